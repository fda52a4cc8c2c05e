//! Fire-and-forget dispatch.
//!
//! `dispatch` returns at once; the enqueue runs on a tracked task bounded by
//! a timeout. Failures are logged and counted, never surfaced.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::config::FireAndForgetConfig;
use crate::domain::{QueueName, TaskEnvelope};
use crate::ports::TaskEnqueuer;
use crate::telemetry::FIRE_AND_FORGET_FAILURES;

#[derive(Clone)]
pub struct FireAndForget {
    enqueuer: Arc<dyn TaskEnqueuer>,
    tracker: TaskTracker,
    timeout: Duration,
    default_queue: QueueName,
}

impl FireAndForget {
    pub fn new(enqueuer: Arc<dyn TaskEnqueuer>, config: &FireAndForgetConfig) -> Self {
        Self {
            enqueuer,
            tracker: TaskTracker::new(),
            timeout: config.timeout(),
            default_queue: config.default_queue,
        }
    }

    /// Enqueue in the background. The envelope lands on the low queue unless
    /// it picked one.
    pub fn dispatch(&self, envelope: TaskEnvelope) {
        let envelope = envelope.with_default_queue(self.default_queue);
        let enqueuer = Arc::clone(&self.enqueuer);
        let timeout = self.timeout;

        self.tracker.spawn(async move {
            let task_type = envelope.task_type().to_string();
            match tokio::time::timeout(timeout, enqueuer.enqueue(envelope)).await {
                Ok(Ok(id)) => {
                    debug!(task_type = %task_type, delivery_id = %id, "fire-and-forget enqueued");
                }
                Ok(Err(e)) => {
                    warn!(task_type = %task_type, error = %e, "fire-and-forget enqueue failed");
                    metrics::counter!(
                        FIRE_AND_FORGET_FAILURES,
                        "task_type" => task_type,
                        "reason" => "enqueue_error"
                    )
                    .increment(1);
                }
                Err(_) => {
                    warn!(
                        task_type = %task_type,
                        timeout_ms = timeout.as_millis() as u64,
                        "fire-and-forget enqueue timed out"
                    );
                    metrics::counter!(
                        FIRE_AND_FORGET_FAILURES,
                        "task_type" => task_type,
                        "reason" => "timeout"
                    )
                    .increment(1);
                }
            }
        });
    }

    /// Dispatches still running.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Wait for outstanding dispatches. Each one is bounded by the timeout.
    pub async fn shutdown(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}
