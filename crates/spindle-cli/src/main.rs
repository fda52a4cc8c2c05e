use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use spindle_core::app::{Client, Pipeline, ServerBuilder, TaskContext, handler_fn};
use spindle_core::config::{LoggingConfig, SpindleConfig};
use spindle_core::dispatch::{FanoutEvent, FanoutPublisher, FanoutRegistry, FireAndForget, ScheduleEntry, Scheduler};
use spindle_core::domain::{HandlerError, TaskEnvelope, TaskType};
use spindle_core::impls::{InMemoryBroker, InMemoryIdempotencyStore};
use spindle_core::ports::SystemClock;
use spindle_core::typed::{Handler, Task};

#[derive(Debug, Serialize, Deserialize)]
struct SendWelcomeEmail {
    user_id: u64,
    email: String,
}

impl Task for SendWelcomeEmail {
    const TYPE: &'static str = "email:welcome";
    const MAX_RETRY: u32 = 5;

    fn idempotency_key(&self) -> Option<String> {
        Some(format!("welcome:{}", self.user_id))
    }
}

struct WelcomeEmailHandler;

#[async_trait]
impl Handler<SendWelcomeEmail> for WelcomeEmailHandler {
    async fn handle(&self, ctx: &TaskContext, task: SendWelcomeEmail) -> Result<(), HandlerError> {
        if !task.email.contains('@') {
            return Err(HandlerError::validation(format!("bad address: {}", task.email)));
        }
        info!(user_id = task.user_id, attempt = ctx.attempt(), "sending welcome email");
        Ok(())
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let json = logging.json;
    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer().with_target(false)))
        .init();
}

/// Log the delivery and succeed.
fn logging_handler(name: &'static str) -> Arc<dyn spindle_core::app::TaskHandler> {
    handler_fn(move |ctx, delivery| async move {
        info!(
            handler = name,
            task_type = %delivery.task_type(),
            delivery_id = %ctx.delivery_id(),
            payload = %String::from_utf8_lossy(delivery.payload()),
            "handled"
        );
        Ok(())
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = SpindleConfig::load(config_path.as_deref()).context("loading configuration")?;
    init_tracing(&config.logging);

    let broker = InMemoryBroker::from_config(&config.broker);
    let store = Arc::new(InMemoryIdempotencyStore::new());
    let fanout = Arc::new(FanoutRegistry::new());
    let order_created = TaskType::new("order:created")?;

    let server = ServerBuilder::new(Arc::new(broker.clone()))
        .config(config.server.clone())
        .pipeline(Pipeline::standard(store, config.idempotency.to_middleware_config()))
        .register::<SendWelcomeEmail, _>(WelcomeEmailHandler)?
        .handle(TaskType::new("report:heartbeat")?, logging_handler("heartbeat"))?
        .handle(TaskType::new("audit:login")?, logging_handler("audit"))?
        .fanout_handler(&fanout, &order_created, "email", logging_handler("order-email"))?
        .fanout_handler(&fanout, &order_created, "warehouse", logging_handler("order-warehouse"))?
        .expect_tasks(&[SendWelcomeEmail::TYPE, "report:heartbeat", "audit:login"])
        .build()?;
    let handle = server.start();

    let mut scheduler = Scheduler::new(Arc::new(broker.clone()), Arc::new(SystemClock));
    scheduler.add(ScheduleEntry::new(
        "heartbeat",
        "* * * * *",
        TaskType::new("report:heartbeat")?,
    ))?;
    let scheduler_stop = CancellationToken::new();
    let scheduler_task = tokio::spawn(scheduler.run(scheduler_stop.clone()));

    let client = Client::new(Arc::new(broker.clone()));
    let id = client
        .enqueue_task(&SendWelcomeEmail {
            user_id: 1,
            email: "ada@example.com".to_string(),
        })
        .await?;
    info!(delivery_id = %id, "welcome email enqueued");

    let fire_and_forget = FireAndForget::new(Arc::new(client.clone()), &config.fire_and_forget);
    fire_and_forget.dispatch(TaskEnvelope::json(
        TaskType::new("audit:login")?,
        &serde_json::json!({"user_id": 1}),
    )?);

    let publisher = FanoutPublisher::new(fanout, Arc::new(client));
    let event = FanoutEvent::json(order_created, &serde_json::json!({"order_id": 42}))?
        .idempotency_key("order:42");
    let published = publisher.publish(&event).await;
    info!(handlers = published.len(), "order event published");

    info!("running, press ctrl-c to stop");
    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;

    scheduler_stop.cancel();
    let _ = scheduler_task.await;
    fire_and_forget.shutdown().await;
    handle.shutdown().await;

    info!(counts = ?broker.counts_by_state().await, "final queue counts");
    Ok(())
}
