use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::app::{Middleware, TaskContext, TaskHandler};
use crate::domain::{Delivery, HandlerError};
use crate::telemetry::task_status;

/// One structured line per finished delivery.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingMiddleware;

impl Middleware for LoggingMiddleware {
    fn wrap(&self, next: Arc<dyn TaskHandler>) -> Arc<dyn TaskHandler> {
        Arc::new(Logged { next })
    }
}

struct Logged {
    next: Arc<dyn TaskHandler>,
}

#[async_trait]
impl TaskHandler for Logged {
    async fn handle(&self, ctx: &TaskContext, delivery: &Delivery) -> Result<(), HandlerError> {
        debug!(
            task_type = %delivery.task_type(),
            delivery_id = %delivery.id,
            attempt = ctx.attempt(),
            "task started"
        );
        let start = Instant::now();
        let result = self.next.handle(ctx, delivery).await;
        let duration_ms = start.elapsed().as_millis() as u64;
        let status = task_status(&result);

        match &result {
            Ok(()) => info!(
                task_type = %delivery.task_type(),
                delivery_id = %delivery.id,
                duration_ms,
                status,
                "task completed"
            ),
            Err(e) => warn!(
                task_type = %delivery.task_type(),
                delivery_id = %delivery.id,
                duration_ms,
                status,
                attempt = ctx.attempt(),
                retryable = e.retryable(),
                error = %e,
                "task failed"
            ),
        }
        result
    }
}
