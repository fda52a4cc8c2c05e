//! TaskEnvelope - the unit of work handed to the broker.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ids::DeliveryId;
use super::queue::QueueName;
use super::task_type::TaskType;

/// Default ceiling on redeliveries.
pub const DEFAULT_MAX_RETRY: u32 = 25;

/// Task type + opaque payload + delivery options.
///
/// The payload is never decoded by the transport; handlers validate it on
/// receipt. Built with chained setters:
///
/// ```ignore
/// let env = TaskEnvelope::json(task_type, &payload)?
///     .queue(QueueName::Critical)
///     .max_retry(3)
///     .idempotency_key("order:42");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEnvelope {
    task_type: TaskType,
    payload: Vec<u8>,
    /// `None` until the caller picks a queue; dispatch patterns may fill in
    /// their own default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    queue: Option<QueueName>,
    max_retry: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    idempotency_key: Option<String>,
}

impl TaskEnvelope {
    pub fn new(task_type: TaskType, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            task_type,
            payload: payload.into(),
            queue: None,
            max_retry: DEFAULT_MAX_RETRY,
            timeout_ms: None,
            idempotency_key: None,
        }
    }

    /// Serialize `value` as the JSON payload.
    pub fn json<T: Serialize>(task_type: TaskType, value: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::new(task_type, serde_json::to_vec(value)?))
    }

    pub fn queue(mut self, queue: QueueName) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Set the queue only if the caller hasn't.
    pub fn with_default_queue(mut self, queue: QueueName) -> Self {
        self.queue.get_or_insert(queue);
        self
    }

    pub fn max_retry(mut self, max_retry: u32) -> Self {
        self.max_retry = max_retry;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn task_type(&self) -> &TaskType {
        &self.task_type
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn queue_name(&self) -> QueueName {
        self.queue.unwrap_or_default()
    }

    pub fn explicit_queue(&self) -> Option<QueueName> {
        self.queue
    }

    pub fn retry_limit(&self) -> u32 {
        self.max_retry
    }

    pub fn task_timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    pub fn key(&self) -> Option<&str> {
        self.idempotency_key.as_deref()
    }

    pub fn decode_json<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }
}

/// An envelope as handed to a worker by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub id: DeliveryId,
    pub envelope: TaskEnvelope,
    /// Redeliveries so far; 0 on the first attempt.
    pub retried: u32,
}

impl Delivery {
    pub fn new(id: DeliveryId, envelope: TaskEnvelope, retried: u32) -> Self {
        Self {
            id,
            envelope,
            retried,
        }
    }

    /// 1-based attempt number.
    pub fn attempt(&self) -> u32 {
        self.retried + 1
    }

    pub fn task_type(&self) -> &TaskType {
        self.envelope.task_type()
    }

    pub fn payload(&self) -> &[u8] {
        self.envelope.payload()
    }

    pub fn queue(&self) -> QueueName {
        self.envelope.queue_name()
    }

    pub fn is_last_attempt(&self) -> bool {
        self.retried >= self.envelope.retry_limit()
    }
}
