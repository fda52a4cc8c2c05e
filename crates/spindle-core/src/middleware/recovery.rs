use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::error;

use crate::app::{Middleware, TaskContext, TaskHandler};
use crate::domain::{Delivery, HandlerError};

/// Turns a handler panic into a transient `HandlerError` so the worker
/// settles the delivery instead of losing the slot.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecoveryMiddleware;

impl Middleware for RecoveryMiddleware {
    fn wrap(&self, next: Arc<dyn TaskHandler>) -> Arc<dyn TaskHandler> {
        Arc::new(Recovery { next })
    }
}

struct Recovery {
    next: Arc<dyn TaskHandler>,
}

#[async_trait]
impl TaskHandler for Recovery {
    async fn handle(&self, ctx: &TaskContext, delivery: &Delivery) -> Result<(), HandlerError> {
        match AssertUnwindSafe(self.next.handle(ctx, delivery))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => {
                let panic_msg = panic_message(panic.as_ref());
                error!(
                    task_type = %delivery.task_type(),
                    delivery_id = %delivery.id,
                    panic_msg = %panic_msg,
                    "handler panicked"
                );
                Err(HandlerError::transient(format!("handler panicked: {panic_msg}")))
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
