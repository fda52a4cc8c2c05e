//! In-memory broker.
//!
//! Reference implementation of `TaskEnqueuer` + `Broker` used by tests and
//! the demo binary. It keeps the semantics a durable broker has to offer:
//! strict queue priority, broker-managed retry with backoff, archive on
//! exhaustion, lease expiry so abandoned deliveries come back.
//! Completed and archived records stay inspectable for a retention window,
//! then they are dropped.

mod record;
mod retry;

pub use retry::RetryPolicy;

use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use self::record::TaskRecord;
use crate::config::BrokerConfig;
use crate::domain::{
    Delivery, DeliveryId, ErrorKind, Failure, QueueName, TaskEnvelope, TaskState, TaskType,
};
use crate::error::{BrokerError, EnqueueError};
use crate::ports::{Broker, DeliveryLease, IdGenerator, SystemClock, TaskEnqueuer, UlidGenerator};

/// Default time a worker may hold a lease before the delivery is reclaimed.
pub const DEFAULT_LEASE_DURATION: Duration = Duration::from_secs(15 * 60);

/// Default time completed and archived records stay inspectable.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub pending: usize,
    pub active: usize,
    pub retry: usize,
    pub completed: usize,
    pub archived: usize,
}

/// Read-only snapshot of one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInfo {
    pub id: DeliveryId,
    pub task_type: TaskType,
    pub queue: QueueName,
    pub state: TaskState,
    pub retried: u32,
    pub max_retry: u32,
    pub last_error: Option<String>,
    pub last_error_kind: Option<ErrorKind>,
}

impl From<&TaskRecord> for TaskInfo {
    fn from(r: &TaskRecord) -> Self {
        Self {
            id: r.id,
            task_type: r.envelope.task_type().clone(),
            queue: r.queue(),
            state: r.state,
            retried: r.retried,
            max_retry: r.envelope.retry_limit(),
            last_error: r.last_error.as_ref().map(|f| f.message.clone()),
            last_error_kind: r.last_error_kind(),
        }
    }
}

/// Retry entry. Reverse ordering turns `BinaryHeap` into a min-heap.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ScheduledTask {
    run_at: Instant,
    id: DeliveryId,
}

impl PartialOrd for ScheduledTask {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledTask {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .run_at
            .cmp(&self.run_at)
            .then_with(|| other.id.cmp(&self.id))
    }
}

#[derive(Default)]
struct BrokerState {
    records: HashMap<DeliveryId, TaskRecord>,
    pending: HashMap<QueueName, VecDeque<DeliveryId>>,
    scheduled: BinaryHeap<ScheduledTask>,
    /// Active deliveries and their lease expiry.
    leased: HashMap<DeliveryId, Instant>,
    /// Terminal records in the order they finished.
    finished: VecDeque<(Instant, DeliveryId)>,
}

impl BrokerState {
    fn push_pending(&mut self, queue: QueueName, id: DeliveryId) {
        self.pending.entry(queue).or_default().push_back(id);
    }

    fn finish(&mut self, id: DeliveryId) {
        self.finished.push_back((Instant::now(), id));
    }

    /// Drop terminal records that finished more than `retention` ago.
    fn evict_finished(&mut self, now: Instant, retention: Duration) {
        while let Some(&(finished_at, id)) = self.finished.front() {
            if finished_at + retention > now {
                break;
            }
            self.finished.pop_front();
            self.records.remove(&id);
        }
    }

    /// Retry -> Pending for every entry whose backoff elapsed.
    fn promote_scheduled(&mut self, now: Instant) {
        while let Some(entry) = self.scheduled.peek() {
            if entry.run_at > now {
                break;
            }
            let Some(entry) = self.scheduled.pop() else {
                break;
            };
            if let Some(record) = self.records.get_mut(&entry.id)
                && record.state == TaskState::Retry
            {
                record.requeue();
                let queue = record.queue();
                self.push_pending(queue, entry.id);
            }
        }
    }

    /// Active -> Pending for leases nobody settled in time.
    fn reclaim_expired(&mut self, now: Instant) {
        let expired: Vec<DeliveryId> = self
            .leased
            .iter()
            .filter(|(_, expires_at)| **expires_at <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            self.leased.remove(&id);
            if let Some(record) = self.records.get_mut(&id)
                && record.state == TaskState::Active
            {
                warn!(delivery_id = %id, task_type = %record.envelope.task_type(), "lease expired, requeueing");
                record.requeue();
                let queue = record.queue();
                self.push_pending(queue, id);
            }
        }
    }

    fn next_ready(&mut self, order: &[QueueName], lease_duration: Duration) -> Option<(Delivery, u64)> {
        for queue in order {
            let Some(ids) = self.pending.get_mut(queue) else {
                continue;
            };
            while let Some(id) = ids.pop_front() {
                let Some(record) = self.records.get_mut(&id) else {
                    continue;
                };
                if !record.state.is_leasable() {
                    continue;
                }
                let expires_at = Instant::now() + lease_duration;
                let generation = record.start_attempt(expires_at);
                let delivery = record.delivery();
                self.leased.insert(id, expires_at);
                return Some((delivery, generation));
            }
        }
        None
    }

    fn has_ready(&self, order: &[QueueName]) -> bool {
        order
            .iter()
            .any(|q| self.pending.get(q).is_some_and(|ids| !ids.is_empty()))
    }

    /// Earliest moment something may become leasable without an enqueue.
    fn next_wake(&self) -> Option<Instant> {
        let retry = self.scheduled.peek().map(|e| e.run_at);
        let expiry = self.leased.values().min().copied();
        match (retry, expiry) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn counts_by_state(&self) -> QueueCounts {
        let mut counts = QueueCounts::default();
        for record in self.records.values() {
            match record.state {
                TaskState::Pending => counts.pending += 1,
                TaskState::Active => counts.active += 1,
                TaskState::Retry => counts.retry += 1,
                TaskState::Completed => counts.completed += 1,
                TaskState::Archived => counts.archived += 1,
            }
        }
        counts
    }

    fn record_for_lease(
        &mut self,
        id: DeliveryId,
        generation: u64,
    ) -> Result<&mut TaskRecord, BrokerError> {
        match self.records.get_mut(&id) {
            Some(record) if record.holds_lease(generation) => {
                self.leased.remove(&id);
                Ok(record)
            }
            _ => Err(BrokerError::LeaseLost(id)),
        }
    }
}

struct Shared {
    state: Mutex<BrokerState>,
    notify: Notify,
    retry_policy: RetryPolicy,
    lease_duration: Duration,
    retention: Duration,
    ids: Box<dyn IdGenerator>,
    closed: AtomicBool,
}

/// In-memory broker.
#[derive(Clone)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

impl InMemoryBroker {
    pub fn new(retry_policy: RetryPolicy) -> Self {
        Self::with_options(
            retry_policy,
            DEFAULT_LEASE_DURATION,
            DEFAULT_RETENTION,
            Box::new(UlidGenerator::new(SystemClock)),
        )
    }

    pub fn with_options(
        retry_policy: RetryPolicy,
        lease_duration: Duration,
        retention: Duration,
        ids: Box<dyn IdGenerator>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(BrokerState::default()),
                notify: Notify::new(),
                retry_policy,
                lease_duration,
                retention,
                ids,
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn from_config(config: &BrokerConfig) -> Self {
        Self::with_options(
            config.retry_policy(),
            config.lease_duration(),
            config.retention(),
            Box::new(UlidGenerator::new(SystemClock)),
        )
    }

    /// Reject further enqueues with `EnqueueError::Unavailable`.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
    }

    pub fn reopen(&self) {
        self.shared.closed.store(false, Ordering::SeqCst);
    }

    pub async fn counts_by_state(&self) -> QueueCounts {
        self.shared.state.lock().await.counts_by_state()
    }

    pub async fn task_info(&self, id: DeliveryId) -> Option<TaskInfo> {
        let state = self.shared.state.lock().await;
        state.records.get(&id).map(TaskInfo::from)
    }

    /// Dead tasks, oldest first.
    pub async fn archived(&self) -> Vec<TaskInfo> {
        let state = self.shared.state.lock().await;
        let mut dead: Vec<&TaskRecord> = state
            .records
            .values()
            .filter(|r| r.state == TaskState::Archived)
            .collect();
        dead.sort_by_key(|r| r.created_at);
        dead.into_iter().map(TaskInfo::from).collect()
    }
}

#[async_trait]
impl TaskEnqueuer for InMemoryBroker {
    async fn enqueue(&self, envelope: TaskEnvelope) -> Result<DeliveryId, EnqueueError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(EnqueueError::Unavailable("broker closed".to_string()));
        }
        let id = self.shared.ids.generate_delivery_id();
        let queue = envelope.queue_name();
        {
            let mut state = self.shared.state.lock().await;
            state.evict_finished(Instant::now(), self.shared.retention);
            state.records.insert(id, TaskRecord::new(id, envelope));
            state.push_pending(queue, id);
        }
        self.shared.notify.notify_one();
        debug!(delivery_id = %id, queue = %queue, "accepted");
        Ok(id)
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn lease(
        &self,
        queues: &[QueueName],
        wait: Duration,
    ) -> Result<Option<Box<dyn DeliveryLease>>, BrokerError> {
        let order = QueueName::drain_order(queues);
        let deadline = Instant::now() + wait;

        loop {
            let next_wake = {
                let mut state = self.shared.state.lock().await;
                let now = Instant::now();
                state.reclaim_expired(now);
                state.promote_scheduled(now);
                state.evict_finished(now, self.shared.retention);

                if let Some((delivery, generation)) =
                    state.next_ready(&order, self.shared.lease_duration)
                {
                    let more = state.has_ready(&order);
                    drop(state);
                    // Hand the wakeup on so an idle sibling picks up the rest.
                    if more {
                        self.shared.notify.notify_one();
                    }
                    return Ok(Some(Box::new(InMemoryLease {
                        delivery,
                        generation,
                        shared: Arc::clone(&self.shared),
                    })));
                }

                state.next_wake()
            };

            if Instant::now() >= deadline {
                return Ok(None);
            }
            let wake_at = next_wake.map_or(deadline, |at| at.min(deadline));
            tokio::select! {
                _ = self.shared.notify.notified() => {},
                _ = tokio::time::sleep_until(wake_at) => {},
            }
        }
    }
}

struct InMemoryLease {
    delivery: Delivery,
    generation: u64,
    shared: Arc<Shared>,
}

#[async_trait]
impl DeliveryLease for InMemoryLease {
    fn delivery(&self) -> &Delivery {
        &self.delivery
    }

    async fn ack(self: Box<Self>) -> Result<(), BrokerError> {
        let mut state = self.shared.state.lock().await;
        let record = state.record_for_lease(self.delivery.id, self.generation)?;
        record.mark_completed();
        state.finish(self.delivery.id);
        Ok(())
    }

    async fn fail(self: Box<Self>, failure: Failure) -> Result<(), BrokerError> {
        let rescheduled = {
            let mut state = self.shared.state.lock().await;
            let record = state.record_for_lease(self.delivery.id, self.generation)?;

            if !failure.retryable() || record.retries_exhausted() {
                info!(
                    delivery_id = %record.id,
                    task_type = %record.envelope.task_type(),
                    retried = record.retried,
                    error = %failure.message,
                    "archiving task"
                );
                record.mark_archived(failure);
                state.finish(self.delivery.id);
                false
            } else {
                let delay = self.shared.retry_policy.next_delay(record.retried + 1);
                let run_at = Instant::now() + delay;
                debug!(
                    delivery_id = %record.id,
                    retry = record.retried + 1,
                    max_retry = record.envelope.retry_limit(),
                    delay_ms = delay.as_millis() as u64,
                    "scheduling retry"
                );
                record.schedule_retry(run_at, failure);
                let id = record.id;
                state.scheduled.push(ScheduledTask { run_at, id });
                true
            }
        };
        // Waiters may be sleeping past the new retry time.
        if rescheduled {
            self.shared.notify.notify_one();
        }
        Ok(())
    }

    async fn release(self: Box<Self>) -> Result<(), BrokerError> {
        {
            let mut state = self.shared.state.lock().await;
            let record = state.record_for_lease(self.delivery.id, self.generation)?;
            record.requeue();
            let (queue, id) = (record.queue(), record.id);
            state.pending.entry(queue).or_default().push_front(id);
        }
        self.shared.notify.notify_one();
        Ok(())
    }
}
