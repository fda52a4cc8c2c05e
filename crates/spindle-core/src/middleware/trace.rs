use std::sync::Arc;

use async_trait::async_trait;
use tracing::{Instrument, info_span};

use crate::app::{Middleware, TaskContext, TaskHandler};
use crate::domain::{Delivery, HandlerError};

/// Runs the rest of the chain inside a `task` span.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMiddleware;

impl Middleware for TracingMiddleware {
    fn wrap(&self, next: Arc<dyn TaskHandler>) -> Arc<dyn TaskHandler> {
        Arc::new(Traced { next })
    }
}

struct Traced {
    next: Arc<dyn TaskHandler>,
}

#[async_trait]
impl TaskHandler for Traced {
    async fn handle(&self, ctx: &TaskContext, delivery: &Delivery) -> Result<(), HandlerError> {
        let span = info_span!(
            "task",
            task_type = %delivery.task_type(),
            delivery_id = %delivery.id,
            queue = %delivery.queue(),
            attempt = ctx.attempt(),
        );
        self.next.handle(ctx, delivery).instrument(span).await
    }
}
