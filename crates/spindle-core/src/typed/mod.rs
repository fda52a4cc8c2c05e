//! Typed - typed task API.
//!
//! Two layers:
//! - **Typed**: `Task`, `Handler<T>` - payload type and task type are paired
//!   at compile time
//! - **Erased**: `TypedHandler<T, H>` implements `TaskHandler` so typed
//!   handlers sit in the same registry and pipeline as raw ones

pub mod handler;
pub mod task;

pub use self::handler::{Handler, TypedHandler};
pub use self::task::Task;
