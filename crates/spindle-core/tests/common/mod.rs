#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use spindle_core::app::ServerBuilder;
use spindle_core::config::ServerConfig;
use spindle_core::domain::{DeliveryId, TaskState};
use spindle_core::impls::{InMemoryBroker, RetryPolicy, TaskInfo};
use tokio::time::Instant;

pub fn broker() -> InMemoryBroker {
    InMemoryBroker::new(RetryPolicy::immediate())
}

pub fn fast_config(concurrency: usize) -> ServerConfig {
    ServerConfig {
        concurrency,
        poll_interval_ms: 20,
        shutdown_grace_ms: 500,
        ..ServerConfig::default()
    }
}

pub fn builder(broker: &InMemoryBroker, concurrency: usize) -> ServerBuilder {
    ServerBuilder::new(Arc::new(broker.clone())).config(fast_config(concurrency))
}

/// Poll until the delivery reaches a terminal state.
pub async fn wait_terminal(broker: &InMemoryBroker, id: DeliveryId) -> TaskInfo {
    wait_until(broker, id, |info| info.state.is_terminal()).await
}

pub async fn wait_for_state(broker: &InMemoryBroker, id: DeliveryId, state: TaskState) -> TaskInfo {
    wait_until(broker, id, |info| info.state == state).await
}

async fn wait_until(
    broker: &InMemoryBroker,
    id: DeliveryId,
    done: impl Fn(&TaskInfo) -> bool,
) -> TaskInfo {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let info = broker.task_info(id).await.expect("delivery exists");
        if done(&info) {
            return info;
        }
        assert!(Instant::now() < deadline, "{id} stuck in {:?}", info.state);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
