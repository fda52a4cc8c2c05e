//! spindle-core
//!
//! Background job execution on top of a queue broker.
//!
//! # Modules
//! - **domain**: task types, envelopes, deliveries, states, handler errors
//! - **ports**: seams to the broker, idempotency store, clock, id generation
//! - **app**: enqueue client, handler pipeline, worker server
//! - **middleware**: tracing, metrics, logging, idempotency, panic recovery
//! - **typed**: typed `Task` / `Handler` API over JSON payloads
//! - **dispatch**: fire-and-forget, cron scheduling, fanout
//! - **impls**: in-memory broker and store, Redis store behind `redis`
//! - **config**: layered configuration (defaults, file, `SPINDLE__*` env)

pub mod app;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod error;
pub mod impls;
pub mod middleware;
pub mod ports;
pub mod telemetry;
pub mod typed;

pub use crate::app::{Client, Pipeline, ServerBuilder, ServerHandle, TaskContext, TaskHandler, WorkerServer, handler_fn};
pub use crate::config::SpindleConfig;
pub use crate::dispatch::{FanoutEvent, FanoutPublisher, FanoutRegistry, FireAndForget, ScheduleEntry, Scheduler};
pub use crate::domain::{Delivery, ErrorKind, HandlerError, QueueName, TaskEnvelope, TaskState, TaskType};
pub use crate::typed::{Handler, Task};
