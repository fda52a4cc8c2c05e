//! Enqueue client.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::domain::{DeliveryId, TaskEnvelope};
use crate::error::EnqueueError;
use crate::ports::TaskEnqueuer;
use crate::typed::Task;

/// Thin logging wrapper around a `TaskEnqueuer`. Never retries: a failed
/// enqueue goes straight back to the caller.
#[derive(Clone)]
pub struct Client {
    enqueuer: Arc<dyn TaskEnqueuer>,
}

impl Client {
    pub fn new(enqueuer: Arc<dyn TaskEnqueuer>) -> Self {
        Self { enqueuer }
    }

    pub async fn enqueue_task<T: Task>(&self, task: &T) -> Result<DeliveryId, EnqueueError> {
        self.enqueue(task.to_envelope()?).await
    }
}

#[async_trait]
impl TaskEnqueuer for Client {
    async fn enqueue(&self, envelope: TaskEnvelope) -> Result<DeliveryId, EnqueueError> {
        let task_type = envelope.task_type().clone();
        let queue = envelope.queue_name();
        match self.enqueuer.enqueue(envelope).await {
            Ok(id) => {
                debug!(task_type = %task_type, queue = %queue, delivery_id = %id, "task enqueued");
                Ok(id)
            }
            Err(e) => {
                warn!(task_type = %task_type, queue = %queue, error = %e, "enqueue failed");
                Err(e)
            }
        }
    }
}
