use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::app::{Middleware, TaskContext, TaskHandler};
use crate::domain::{Delivery, HandlerError};

/// Bounds the handler by the context deadline.
///
/// Always the innermost layer: on expiry only the handler future is dropped,
/// and the timeout comes back as a transient error through every outer
/// layer, so the idempotency lock is released and the task is still logged
/// and counted. The context token is cancelled first.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeadlineMiddleware;

impl Middleware for DeadlineMiddleware {
    fn wrap(&self, next: Arc<dyn TaskHandler>) -> Arc<dyn TaskHandler> {
        Arc::new(Deadline { next })
    }
}

struct Deadline {
    next: Arc<dyn TaskHandler>,
}

#[async_trait]
impl TaskHandler for Deadline {
    async fn handle(&self, ctx: &TaskContext, delivery: &Delivery) -> Result<(), HandlerError> {
        let Some(deadline) = ctx.deadline() else {
            return self.next.handle(ctx, delivery).await;
        };

        match tokio::time::timeout_at(deadline, self.next.handle(ctx, delivery)).await {
            Ok(result) => result,
            Err(_) => {
                ctx.cancellation_token().cancel();
                warn!(
                    task_type = %delivery.task_type(),
                    delivery_id = %delivery.id,
                    attempt = ctx.attempt(),
                    "task deadline exceeded"
                );
                Err(HandlerError::transient("task exceeded its deadline"))
            }
        }
    }
}
