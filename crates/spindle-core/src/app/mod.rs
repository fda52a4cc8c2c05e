//! App - application layer.
//!
//! Combines the ports into a running system.
//!
//! # Main components
//! - **Client**: enqueue side, logging wrapper over a `TaskEnqueuer`
//! - **TaskHandler / Pipeline**: handlers and the middleware around them
//! - **ServerBuilder**: registration and fail-fast wiring checks
//! - **WorkerServer / ServerHandle**: worker loops and graceful shutdown

pub mod builder;
pub mod client;
pub mod context;
pub mod pipeline;
pub mod registry;
pub mod server;

pub use self::builder::ServerBuilder;
pub use self::client::Client;
pub use self::context::TaskContext;
pub use self::pipeline::{FnHandler, Middleware, Pipeline, TaskHandler, handler_fn};
pub use self::registry::HandlerRegistry;
pub use self::server::{ServerHandle, WorkerServer};
