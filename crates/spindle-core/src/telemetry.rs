//! Metric names and label values shared by the middleware and dispatchers.
//!
//! Everything goes through the `metrics` facade; which recorder (if any) is
//! installed is up to the binary.

use crate::domain::HandlerError;

/// Counter: `task_type`, `queue`, `status`.
pub const JOBS_PROCESSED: &str = "jobs_processed";

/// Histogram (seconds): `task_type`, `queue`.
pub const JOB_DURATION_SECONDS: &str = "job_duration_seconds";

/// Counter: `task_type`, `reason` (`timeout` | `enqueue_error`).
pub const FIRE_AND_FORGET_FAILURES: &str = "fire_and_forget_failures";

/// Counter: `schedule`, `status` (`success` | `failure`).
pub const SCHEDULED_ENQUEUES: &str = "scheduled_enqueues";

pub const STATUS_SUCCESS: &str = "success";
pub const STATUS_FAILURE: &str = "failure";

/// `status` label for a finished task: `success` or the error kind.
pub fn task_status(result: &Result<(), HandlerError>) -> &'static str {
    match result {
        Ok(()) => STATUS_SUCCESS,
        Err(e) => e.kind().as_str(),
    }
}
