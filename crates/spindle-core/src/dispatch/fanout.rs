//! Fanout: one event, one independent task per subscribed handler.
//!
//! Each subscription gets its own task type (`<event_type>:<handler_id>`),
//! so retries and archiving are tracked per handler and one failing handler
//! never holds back the others.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::domain::task_type::SEPARATOR;
use crate::domain::{DeliveryId, QueueName, TaskEnvelope, TaskType};
use crate::error::{EnqueueError, FanoutError, TaskTypeError};
use crate::ports::{IdGenerator, SystemClock, TaskEnqueuer, UlidGenerator};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub handler_id: String,
    pub task_type: TaskType,
}

/// event type -> subscriptions, in registration order.
#[derive(Debug, Default)]
pub struct FanoutRegistry {
    subscriptions: RwLock<HashMap<TaskType, Vec<Subscription>>>,
}

impl FanoutRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the task type the handler must be registered under.
    pub fn subscribe(&self, event_type: &TaskType, handler_id: &str) -> Result<TaskType, FanoutError> {
        if handler_id.contains(SEPARATOR) {
            return Err(TaskTypeError::InvalidChar {
                value: handler_id.to_string(),
                found: SEPARATOR,
            }
            .into());
        }
        let task_type = event_type.child(handler_id)?;

        let mut subscriptions = self.subscriptions.write();
        let handlers = subscriptions.entry(event_type.clone()).or_default();
        if handlers.iter().any(|s| s.handler_id == handler_id) {
            return Err(FanoutError::DuplicateHandler {
                event_type: event_type.clone(),
                handler_id: handler_id.to_string(),
            });
        }
        handlers.push(Subscription {
            handler_id: handler_id.to_string(),
            task_type: task_type.clone(),
        });
        debug!(event_type = %event_type, handler_id, "fanout handler subscribed");
        Ok(task_type)
    }

    /// Snapshot of the subscriptions for `event_type`.
    pub fn handlers(&self, event_type: &TaskType) -> Vec<Subscription> {
        self.subscriptions
            .read()
            .get(event_type)
            .cloned()
            .unwrap_or_default()
    }

    pub fn handler_ids(&self, event_type: &TaskType) -> Vec<String> {
        self.handlers(event_type)
            .into_iter()
            .map(|s| s.handler_id)
            .collect()
    }

    /// Every derived task type, for `ServerBuilder::expect_tasks`.
    pub fn task_types(&self) -> Vec<TaskType> {
        let mut types: Vec<TaskType> = self
            .subscriptions
            .read()
            .values()
            .flatten()
            .map(|s| s.task_type.clone())
            .collect();
        types.sort();
        types
    }
}

/// An event to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FanoutEvent {
    pub event_type: TaskType,
    pub payload: Vec<u8>,
    pub queue: Option<QueueName>,
    pub max_retry: Option<u32>,
    /// Suffixed with `:<handler_id>` per handler.
    pub idempotency_key: Option<String>,
}

impl FanoutEvent {
    pub fn new(event_type: TaskType, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            event_type,
            payload: payload.into(),
            queue: None,
            max_retry: None,
            idempotency_key: None,
        }
    }

    pub fn json<T: Serialize>(event_type: TaskType, value: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::new(event_type, serde_json::to_vec(value)?))
    }

    pub fn queue(mut self, queue: QueueName) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn max_retry(mut self, max_retry: u32) -> Self {
        self.max_retry = Some(max_retry);
        self
    }

    pub fn idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    fn envelope_for(&self, subscription: &Subscription) -> TaskEnvelope {
        let mut envelope = TaskEnvelope::new(subscription.task_type.clone(), self.payload.clone());
        if let Some(queue) = self.queue {
            envelope = envelope.queue(queue);
        }
        if let Some(max_retry) = self.max_retry {
            envelope = envelope.max_retry(max_retry);
        }
        if let Some(key) = &self.idempotency_key {
            envelope = envelope.idempotency_key(format!("{key}{SEPARATOR}{}", subscription.handler_id));
        }
        envelope
    }
}

/// Enqueue result for one handler.
#[derive(Debug)]
pub struct FanoutDelivery {
    pub handler_id: String,
    pub task_type: TaskType,
    pub result: Result<DeliveryId, EnqueueError>,
}

impl FanoutDelivery {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

#[derive(Clone)]
pub struct FanoutPublisher {
    registry: Arc<FanoutRegistry>,
    enqueuer: Arc<dyn TaskEnqueuer>,
    ids: Arc<dyn IdGenerator>,
}

impl FanoutPublisher {
    pub fn new(registry: Arc<FanoutRegistry>, enqueuer: Arc<dyn TaskEnqueuer>) -> Self {
        Self::with_id_generator(registry, enqueuer, Arc::new(UlidGenerator::new(SystemClock)))
    }

    pub fn with_id_generator(
        registry: Arc<FanoutRegistry>,
        enqueuer: Arc<dyn TaskEnqueuer>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            registry,
            enqueuer,
            ids,
        }
    }

    /// Enqueue one task per subscribed handler, concurrently. Results come
    /// back in registration order; a failed enqueue for one handler does not
    /// affect the others.
    pub async fn publish(&self, event: &FanoutEvent) -> Vec<FanoutDelivery> {
        let subscriptions = self.registry.handlers(&event.event_type);
        if subscriptions.is_empty() {
            debug!(event_type = %event.event_type, "no fanout handlers subscribed");
            return Vec::new();
        }

        let event_id = self.ids.generate_event_id();
        let enqueues = subscriptions.into_iter().map(|subscription| async move {
            let result = self.enqueuer.enqueue(event.envelope_for(&subscription)).await;
            if let Err(e) = &result {
                warn!(
                    event_id = %event_id,
                    handler_id = %subscription.handler_id,
                    error = %e,
                    "fanout enqueue failed"
                );
            }
            FanoutDelivery {
                handler_id: subscription.handler_id,
                task_type: subscription.task_type,
                result,
            }
        });
        let deliveries = futures::future::join_all(enqueues).await;

        info!(
            event_id = %event_id,
            event_type = %event.event_type,
            handlers = deliveries.len(),
            failed = deliveries.iter().filter(|d| !d.is_ok()).count(),
            "fanout event published"
        );
        deliveries
    }
}
