//! TaskEnqueuer port - hand an envelope to the broker.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{DeliveryId, TaskEnvelope};
use crate::error::EnqueueError;

/// Anything that can durably accept an envelope.
///
/// On `Ok` the broker has accepted the envelope (at-least-once handoff).
/// Implementations do not retry on failure: a retried enqueue can't be told
/// apart from a second logical submission, so that decision stays with the
/// caller.
#[async_trait]
pub trait TaskEnqueuer: Send + Sync {
    async fn enqueue(&self, envelope: TaskEnvelope) -> Result<DeliveryId, EnqueueError>;
}

#[async_trait]
impl<E: TaskEnqueuer + ?Sized> TaskEnqueuer for Arc<E> {
    async fn enqueue(&self, envelope: TaskEnvelope) -> Result<DeliveryId, EnqueueError> {
        (**self).enqueue(envelope).await
    }
}
