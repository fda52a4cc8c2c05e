mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use spindle_core::app::{Client, Pipeline, TaskContext, handler_fn};
use spindle_core::domain::{ErrorKind, HandlerError, QueueName, TaskEnvelope, TaskState, TaskType};
use spindle_core::impls::InMemoryIdempotencyStore;
use spindle_core::middleware::{FailMode, IdempotencyConfig};
use spindle_core::ports::{IdempotencyState, IdempotencyStore, TaskEnqueuer};
use spindle_core::typed::{Handler, Task};

use common::{broker, builder, wait_terminal};

fn envelope(task_type: &str) -> TaskEnvelope {
    TaskEnvelope::new(TaskType::new(task_type).unwrap(), b"{}".to_vec())
}

#[tokio::test]
async fn transient_failure_is_retried_until_max_retry_then_archived() {
    let broker = broker();
    let attempts = Arc::new(AtomicUsize::new(0));
    let seen = attempts.clone();
    let handle = builder(&broker, 1)
        .handle(
            TaskType::new("sms:send").unwrap(),
            handler_fn(move |_ctx, _d| {
                let seen = seen.clone();
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                    Err(HandlerError::transient("gateway 503"))
                }
            }),
        )
        .unwrap()
        .build()
        .unwrap()
        .start();

    let id = broker.enqueue(envelope("sms:send").max_retry(2)).await.unwrap();
    let info = wait_terminal(&broker, id).await;
    handle.shutdown().await;

    assert_eq!(info.state, TaskState::Archived);
    assert_eq!(info.retried, 2);
    assert_eq!(info.last_error_kind, Some(ErrorKind::Transient));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn validation_error_is_never_redelivered() {
    let broker = broker();
    let attempts = Arc::new(AtomicUsize::new(0));
    let seen = attempts.clone();
    let handle = builder(&broker, 2)
        .handle(
            TaskType::new("user:import").unwrap(),
            handler_fn(move |_ctx, _d| {
                let seen = seen.clone();
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                    Err(HandlerError::validation("email column missing"))
                }
            }),
        )
        .unwrap()
        .build()
        .unwrap()
        .start();

    let id = broker.enqueue(envelope("user:import")).await.unwrap();
    let info = wait_terminal(&broker, id).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.shutdown().await;

    assert_eq!(info.state, TaskState::Archived);
    assert_eq!(info.retried, 0);
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn higher_priority_queues_drain_first() {
    let broker = broker();
    for (task_type, queue) in [
        ("log:low", QueueName::Low),
        ("log:default", QueueName::Default),
        ("log:critical", QueueName::Critical),
    ] {
        broker.enqueue(envelope(task_type).queue(queue)).await.unwrap();
    }

    let order = Arc::new(Mutex::new(Vec::new()));
    let mut server = builder(&broker, 1);
    for task_type in ["log:low", "log:default", "log:critical"] {
        let order = order.clone();
        server = server
            .handle(
                TaskType::new(task_type).unwrap(),
                handler_fn(move |_ctx, d| {
                    let order = order.clone();
                    async move {
                        order.lock().push(d.task_type().to_string());
                        Ok(())
                    }
                }),
            )
            .unwrap();
    }
    let handle = server.build().unwrap().start();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while broker.counts_by_state().await.completed < 3 {
        assert!(tokio::time::Instant::now() < deadline, "tasks not drained");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    handle.shutdown().await;

    assert_eq!(*order.lock(), vec!["log:critical", "log:default", "log:low"]);
}

#[derive(Debug, Serialize, Deserialize)]
struct ChargeOrder {
    order_id: u64,
}

impl Task for ChargeOrder {
    const TYPE: &'static str = "order:charge";
    const QUEUE: Option<QueueName> = Some(QueueName::Critical);
    const MAX_RETRY: u32 = 3;

    fn idempotency_key(&self) -> Option<String> {
        Some(format!("order:{}", self.order_id))
    }
}

struct ChargeHandler {
    charges: Arc<AtomicUsize>,
}

#[async_trait]
impl Handler<ChargeOrder> for ChargeHandler {
    async fn handle(&self, _ctx: &TaskContext, _task: ChargeOrder) -> Result<(), HandlerError> {
        tokio::time::sleep(Duration::from_millis(300)).await;
        self.charges.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn fail_closed_key_allows_a_single_side_effect() {
    let broker = broker();
    let store = Arc::new(InMemoryIdempotencyStore::new());
    let charges = Arc::new(AtomicUsize::new(0));
    let client = Client::new(Arc::new(broker.clone()));

    let first = client.enqueue_task(&ChargeOrder { order_id: 42 }).await.unwrap();
    let second = client.enqueue_task(&ChargeOrder { order_id: 42 }).await.unwrap();

    let handle = builder(&broker, 2)
        .pipeline(Pipeline::standard(
            store.clone(),
            IdempotencyConfig {
                fail_mode: FailMode::FailClosed,
                ..IdempotencyConfig::default()
            },
        ))
        .register::<ChargeOrder, _>(ChargeHandler {
            charges: charges.clone(),
        })
        .unwrap()
        .build()
        .unwrap()
        .start();

    let a = wait_terminal(&broker, first).await;
    let b = wait_terminal(&broker, second).await;
    handle.shutdown().await;

    assert_eq!(charges.load(Ordering::SeqCst), 1);
    let mut states = vec![a.state, b.state];
    states.sort_by_key(|s| *s == TaskState::Archived);
    assert_eq!(states, vec![TaskState::Completed, TaskState::Archived]);
    let loser = if a.state == TaskState::Archived { a } else { b };
    assert_eq!(loser.last_error_kind, Some(ErrorKind::Conflict));
}

#[tokio::test]
async fn completed_key_skips_later_duplicates() {
    let broker = broker();
    let store = Arc::new(InMemoryIdempotencyStore::new());
    let charges = Arc::new(AtomicUsize::new(0));
    let client = Client::new(Arc::new(broker.clone()));
    let handle = builder(&broker, 1)
        .pipeline(Pipeline::standard(store.clone(), IdempotencyConfig::default()))
        .register::<ChargeOrder, _>(ChargeHandler {
            charges: charges.clone(),
        })
        .unwrap()
        .build()
        .unwrap()
        .start();

    let first = client.enqueue_task(&ChargeOrder { order_id: 7 }).await.unwrap();
    wait_terminal(&broker, first).await;
    let second = client.enqueue_task(&ChargeOrder { order_id: 7 }).await.unwrap();
    let info = wait_terminal(&broker, second).await;
    handle.shutdown().await;

    assert_eq!(info.state, TaskState::Completed);
    assert_eq!(charges.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn panicking_handler_is_retried_and_releases_its_lock() {
    let broker = broker();
    let store = Arc::new(InMemoryIdempotencyStore::new());
    let attempts = Arc::new(AtomicUsize::new(0));
    let seen = attempts.clone();
    let handle = builder(&broker, 1)
        .pipeline(Pipeline::standard(store.clone(), IdempotencyConfig::default()))
        .handle(
            TaskType::new("invoice:render").unwrap(),
            handler_fn(move |_ctx, _d| {
                let seen = seen.clone();
                async move {
                    if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                        panic!("template missing");
                    }
                    Ok(())
                }
            }),
        )
        .unwrap()
        .build()
        .unwrap()
        .start();

    let id = broker
        .enqueue(envelope("invoice:render").idempotency_key("invoice:9"))
        .await
        .unwrap();
    let info = wait_terminal(&broker, id).await;
    handle.shutdown().await;

    assert_eq!(info.state, TaskState::Completed);
    assert_eq!(info.retried, 1);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn timed_out_attempt_releases_its_lock_for_the_retry() {
    let broker = broker();
    let store = Arc::new(InMemoryIdempotencyStore::new());
    let attempts = Arc::new(AtomicUsize::new(0));
    let seen = attempts.clone();
    let handle = builder(&broker, 1)
        .pipeline(Pipeline::standard(
            store.clone(),
            IdempotencyConfig {
                fail_mode: FailMode::FailClosed,
                ..IdempotencyConfig::default()
            },
        ))
        .handle(
            TaskType::new("order:charge").unwrap(),
            handler_fn(move |_ctx, _d| {
                let seen = seen.clone();
                async move {
                    if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                        tokio::time::sleep(Duration::from_secs(10)).await;
                    }
                    Ok(())
                }
            }),
        )
        .unwrap()
        .build()
        .unwrap()
        .start();

    let id = broker
        .enqueue(
            envelope("order:charge")
                .idempotency_key("order:42")
                .timeout(Duration::from_millis(50))
                .max_retry(3),
        )
        .await
        .unwrap();
    let info = wait_terminal(&broker, id).await;
    handle.shutdown().await;

    assert_eq!(info.state, TaskState::Completed);
    assert_eq!(info.retried, 1);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(
        store.get("order:42").await.unwrap(),
        Some(IdempotencyState::Completed)
    );
}
