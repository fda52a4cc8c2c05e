//! Middleware - wrappers composed around every handler at build time.
//!
//! - **TracingMiddleware**: `task` span per delivery
//! - **MetricsMiddleware**: `jobs_processed` / `job_duration_seconds`
//! - **LoggingMiddleware**: one line per finished delivery
//! - **IdempotencyMiddleware**: distributed lock on the envelope's idempotency key
//! - **RecoveryMiddleware**: panic -> transient error
//! - **DeadlineMiddleware**: per-task deadline, always innermost

pub mod deadline;
pub mod idempotency;
pub mod logging;
pub mod meter;
pub mod recovery;
pub mod trace;

pub use self::deadline::DeadlineMiddleware;
pub use self::idempotency::{FailMode, IdempotencyConfig, IdempotencyMiddleware};
pub use self::logging::LoggingMiddleware;
pub use self::meter::MetricsMiddleware;
pub use self::recovery::RecoveryMiddleware;
pub use self::trace::TracingMiddleware;
