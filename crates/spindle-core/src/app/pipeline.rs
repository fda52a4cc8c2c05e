//! Handlers and the middleware pipeline around them.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::app::TaskContext;
use crate::domain::{Delivery, HandlerError};
use crate::middleware::{
    IdempotencyConfig, IdempotencyMiddleware, LoggingMiddleware, MetricsMiddleware,
    RecoveryMiddleware, TracingMiddleware,
};
use crate::ports::IdempotencyStore;

/// Executes one delivery of a task type.
///
/// The payload is opaque bytes; the handler decodes and validates it and
/// picks the `ErrorKind` of any failure.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, ctx: &TaskContext, delivery: &Delivery) -> Result<(), HandlerError>;
}

pub struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(TaskContext, Delivery) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    async fn handle(&self, ctx: &TaskContext, delivery: &Delivery) -> Result<(), HandlerError> {
        (self.f)(ctx.clone(), delivery.clone()).await
    }
}

/// Adapt an async closure into a `TaskHandler`.
///
/// ```ignore
/// let h = handler_fn(|_ctx, delivery| async move {
///     println!("{}", delivery.task_type());
///     Ok(())
/// });
/// ```
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn TaskHandler>
where
    F: Fn(TaskContext, Delivery) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    Arc::new(FnHandler { f })
}

/// Wraps a handler in another handler.
pub trait Middleware: Send + Sync {
    fn wrap(&self, next: Arc<dyn TaskHandler>) -> Arc<dyn TaskHandler>;
}

/// Ordered middleware list. The first entry is the outermost wrapper.
#[derive(Clone, Default)]
pub struct Pipeline {
    layers: Vec<Arc<dyn Middleware>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// tracing -> metrics -> logging -> idempotency -> recovery -> handler.
    ///
    /// Recovery sits inside idempotency so a panicking handler still
    /// releases its lock and is counted as a failure. `ServerBuilder::build`
    /// appends `DeadlineMiddleware` below all of these.
    pub fn standard(store: Arc<dyn IdempotencyStore>, idempotency: IdempotencyConfig) -> Self {
        Self::new()
            .with(TracingMiddleware)
            .with(MetricsMiddleware)
            .with(LoggingMiddleware)
            .with(IdempotencyMiddleware::new(store, idempotency))
            .with(RecoveryMiddleware)
    }

    pub fn with(mut self, middleware: impl Middleware + 'static) -> Self {
        self.layers.push(Arc::new(middleware));
        self
    }

    pub fn push(&mut self, middleware: Arc<dyn Middleware>) {
        self.layers.push(middleware);
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn apply(&self, handler: Arc<dyn TaskHandler>) -> Arc<dyn TaskHandler> {
        self.layers
            .iter()
            .rev()
            .fold(handler, |next, layer| layer.wrap(next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DeliveryId, TaskEnvelope, TaskType};
    use parking_lot::Mutex;
    use ulid::Ulid;

    fn delivery(task_type: &str) -> Delivery {
        Delivery::new(
            DeliveryId::from(Ulid::new()),
            TaskEnvelope::new(TaskType::new(task_type).unwrap(), b"{}".to_vec()),
            0,
        )
    }

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    struct Recorded {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        next: Arc<dyn TaskHandler>,
    }

    impl Middleware for Recorder {
        fn wrap(&self, next: Arc<dyn TaskHandler>) -> Arc<dyn TaskHandler> {
            Arc::new(Recorded {
                name: self.name,
                log: self.log.clone(),
                next,
            })
        }
    }

    #[async_trait]
    impl TaskHandler for Recorded {
        async fn handle(&self, ctx: &TaskContext, delivery: &Delivery) -> Result<(), HandlerError> {
            self.log.lock().push(format!("{}:before", self.name));
            let result = self.next.handle(ctx, delivery).await;
            self.log.lock().push(format!("{}:after", self.name));
            result
        }
    }

    #[tokio::test]
    async fn first_middleware_is_outermost() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let inner_log = log.clone();
        let handler = handler_fn(move |_ctx, _d| {
            let log = inner_log.clone();
            async move {
                log.lock().push("handler".to_string());
                Ok(())
            }
        });

        let pipeline = Pipeline::new()
            .with(Recorder { name: "outer", log: log.clone() })
            .with(Recorder { name: "inner", log: log.clone() });
        let wrapped = pipeline.apply(handler);

        let d = delivery("test:run");
        wrapped.handle(&TaskContext::detached(&d), &d).await.unwrap();

        assert_eq!(
            *log.lock(),
            vec!["outer:before", "inner:before", "handler", "inner:after", "outer:after"]
        );
    }

    #[tokio::test]
    async fn empty_pipeline_returns_handler_untouched() {
        let handler = handler_fn(|_ctx, _d| async { Err(HandlerError::validation("bad")) });
        let wrapped = Pipeline::new().apply(handler);

        let d = delivery("test:run");
        let err = wrapped.handle(&TaskContext::detached(&d), &d).await.unwrap_err();
        assert_eq!(err.message(), "bad");
    }
}
