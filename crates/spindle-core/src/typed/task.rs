//! Task trait - ties a payload type to its task type.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::domain::{DEFAULT_MAX_RETRY, QueueName, TaskEnvelope, TaskType};
use crate::error::EnqueueError;

/// A payload type with a fixed task type.
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct SendWelcomeEmail {
///     user_id: u64,
/// }
///
/// impl Task for SendWelcomeEmail {
///     const TYPE: &'static str = "email:welcome";
/// }
/// ```
///
/// Payloads travel as JSON.
pub trait Task: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// `domain:action`.
    const TYPE: &'static str;

    /// `None` lets the caller (or dispatch pattern) decide.
    const QUEUE: Option<QueueName> = None;

    const MAX_RETRY: u32 = DEFAULT_MAX_RETRY;

    fn task_type() -> Result<TaskType, EnqueueError> {
        TaskType::new(Self::TYPE).map_err(|e| EnqueueError::InvalidEnvelope(e.to_string()))
    }

    /// Per-instance idempotency key.
    fn idempotency_key(&self) -> Option<String> {
        None
    }

    fn to_envelope(&self) -> Result<TaskEnvelope, EnqueueError> {
        let mut envelope = TaskEnvelope::json(Self::task_type()?, self)
            .map_err(|e| EnqueueError::InvalidEnvelope(format!("payload encode failed: {e}")))?
            .max_retry(Self::MAX_RETRY);
        if let Some(queue) = Self::QUEUE {
            envelope = envelope.queue(queue);
        }
        if let Some(key) = self.idempotency_key() {
            envelope = envelope.idempotency_key(key);
        }
        Ok(envelope)
    }
}
