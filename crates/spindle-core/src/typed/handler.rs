//! Handler<T> and its type-erased adapter.

use std::marker::PhantomData;

use async_trait::async_trait;

use super::task::Task;
use crate::app::{TaskContext, TaskHandler};
use crate::domain::{Delivery, HandlerError};

/// Handles one decoded `T`.
///
/// `Handler<ChargeOrder>` only ever receives a `ChargeOrder`; the pairing is
/// checked at compile time.
#[async_trait]
pub trait Handler<T: Task>: Send + Sync {
    async fn handle(&self, ctx: &TaskContext, task: T) -> Result<(), HandlerError>;
}

/// `Handler<T>` -> `TaskHandler`. Decodes the JSON payload first; a payload
/// that does not decode is a validation error and is never retried.
pub struct TypedHandler<T: Task, H: Handler<T>> {
    handler: H,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Task, H: Handler<T>> TypedHandler<T, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Task, H: Handler<T>> TaskHandler for TypedHandler<T, H> {
    async fn handle(&self, ctx: &TaskContext, delivery: &Delivery) -> Result<(), HandlerError> {
        let task: T = delivery.envelope.decode_json()?;
        self.handler.handle(ctx, task).await
    }
}
