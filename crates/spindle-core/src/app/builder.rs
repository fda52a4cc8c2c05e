//! ServerBuilder - handler registration and wiring.
//!
//! Everything that can be wrong with the wiring is reported by `build()`,
//! before the server leases a single task.

use std::sync::Arc;

use crate::app::{HandlerRegistry, Middleware, Pipeline, TaskHandler, WorkerServer};
use crate::config::ServerConfig;
use crate::dispatch::FanoutRegistry;
use crate::domain::TaskType;
use crate::error::BuildError;
use crate::middleware::DeadlineMiddleware;
use crate::ports::Broker;
use crate::typed::{Handler, Task, TypedHandler};

/// Builds a `WorkerServer`.
///
/// ```ignore
/// let server = ServerBuilder::new(broker)
///     .config(config.server.clone())
///     .pipeline(Pipeline::standard(store, config.idempotency.to_middleware_config()))
///     .register::<SendWelcomeEmail, _>(WelcomeEmailHandler)?
///     .handle(TaskType::new("report:daily")?, report_handler)?
///     .expect_tasks(&["email:welcome", "report:daily"])
///     .build()?;
/// ```
pub struct ServerBuilder {
    broker: Arc<dyn Broker>,
    registry: HandlerRegistry,
    pipeline: Pipeline,
    expected_tasks: Option<Vec<String>>,
    config: ServerConfig,
}

impl ServerBuilder {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self {
            broker,
            registry: HandlerRegistry::new(),
            pipeline: Pipeline::new(),
            expected_tasks: None,
            config: ServerConfig::default(),
        }
    }

    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a raw handler.
    pub fn handle(
        mut self,
        task_type: TaskType,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<Self, BuildError> {
        self.registry.register(task_type, handler)?;
        Ok(self)
    }

    /// Register a typed handler under `T::TYPE`.
    pub fn register<T: Task, H: Handler<T> + 'static>(self, handler: H) -> Result<Self, BuildError> {
        let task_type = TaskType::new(T::TYPE)?;
        self.handle(task_type, Arc::new(TypedHandler::<T, H>::new(handler)))
    }

    /// Subscribe `handler_id` to `event_type` and register its handler under
    /// the derived `event_type:handler_id` task type.
    pub fn fanout_handler(
        self,
        fanout: &FanoutRegistry,
        event_type: &TaskType,
        handler_id: &str,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<Self, BuildError> {
        let task_type = fanout.subscribe(event_type, handler_id)?;
        self.handle(task_type, handler)
    }

    /// Append a middleware. Earlier middleware wraps later middleware.
    pub fn middleware(mut self, middleware: impl Middleware + 'static) -> Self {
        self.pipeline = self.pipeline.with(middleware);
        self
    }

    /// Replace the whole pipeline.
    pub fn pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Task types that must have a handler by the time `build()` runs.
    pub fn expect_tasks(mut self, task_types: &[&str]) -> Self {
        let expected = self.expected_tasks.get_or_insert_with(Vec::new);
        expected.extend(task_types.iter().map(|t| t.to_string()));
        self
    }

    pub fn build(self) -> Result<WorkerServer, BuildError> {
        self.config.validate().map_err(BuildError::InvalidConfig)?;

        if let Some(expected_tasks) = &self.expected_tasks {
            let missing_tasks: Vec<String> = expected_tasks
                .iter()
                .filter(|t| !self.registry.contains(t))
                .cloned()
                .collect();
            if !missing_tasks.is_empty() {
                return Err(BuildError::MissingTaskTypes(missing_tasks));
            }
        }

        // The deadline sits inside every other layer so a timeout unwinds
        // through them instead of dropping them.
        let pipeline = self.pipeline.with(DeadlineMiddleware);
        let handlers = self.registry.with_pipeline(&pipeline);
        Ok(WorkerServer::new(self.broker, Arc::new(handlers), self.config))
    }
}
