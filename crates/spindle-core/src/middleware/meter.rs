use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::app::{Middleware, TaskContext, TaskHandler};
use crate::domain::{Delivery, HandlerError};
use crate::telemetry::{JOB_DURATION_SECONDS, JOBS_PROCESSED, task_status};

/// Emits `jobs_processed` and `job_duration_seconds` per delivery.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsMiddleware;

impl Middleware for MetricsMiddleware {
    fn wrap(&self, next: Arc<dyn TaskHandler>) -> Arc<dyn TaskHandler> {
        Arc::new(Metered { next })
    }
}

struct Metered {
    next: Arc<dyn TaskHandler>,
}

#[async_trait]
impl TaskHandler for Metered {
    async fn handle(&self, ctx: &TaskContext, delivery: &Delivery) -> Result<(), HandlerError> {
        let start = Instant::now();
        let result = self.next.handle(ctx, delivery).await;

        let task_type = delivery.task_type().to_string();
        let queue = delivery.queue().as_str();
        metrics::histogram!(
            JOB_DURATION_SECONDS,
            "task_type" => task_type.clone(),
            "queue" => queue
        )
        .record(start.elapsed().as_secs_f64());
        metrics::counter!(
            JOBS_PROCESSED,
            "task_type" => task_type,
            "queue" => queue,
            "status" => task_status(&result)
        )
        .increment(1);

        result
    }
}
