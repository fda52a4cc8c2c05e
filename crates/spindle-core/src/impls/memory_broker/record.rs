//! Task record: envelope + broker bookkeeping.

use tokio::time::Instant;

use crate::domain::{Delivery, DeliveryId, ErrorKind, Failure, QueueName, TaskEnvelope, TaskState};

/// Single source of truth for one delivery. Queue structures hold ids only;
/// every state transition goes through a method here.
#[derive(Debug, Clone)]
pub(crate) struct TaskRecord {
    pub id: DeliveryId,
    pub envelope: TaskEnvelope,
    pub state: TaskState,

    /// Redeliveries consumed so far.
    pub retried: u32,

    pub last_error: Option<Failure>,

    /// When a Retry becomes Pending again.
    pub next_run_at: Option<Instant>,

    /// Bumped on every lease so a settle from an expired lease is rejected.
    pub lease_generation: u64,
    pub lease_expires_at: Option<Instant>,

    pub created_at: Instant,
    pub updated_at: Instant,
}

impl TaskRecord {
    pub fn new(id: DeliveryId, envelope: TaskEnvelope) -> Self {
        let now = Instant::now();
        Self {
            id,
            envelope,
            state: TaskState::Pending,
            retried: 0,
            last_error: None,
            next_run_at: None,
            lease_generation: 0,
            lease_expires_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn queue(&self) -> QueueName {
        self.envelope.queue_name()
    }

    pub fn delivery(&self) -> Delivery {
        Delivery::new(self.id, self.envelope.clone(), self.retried)
    }

    /// Pending -> Active. Returns the new lease generation.
    pub fn start_attempt(&mut self, expires_at: Instant) -> u64 {
        self.state = TaskState::Active;
        self.lease_generation += 1;
        self.lease_expires_at = Some(expires_at);
        self.updated_at = Instant::now();
        self.lease_generation
    }

    pub fn holds_lease(&self, generation: u64) -> bool {
        self.state == TaskState::Active && self.lease_generation == generation
    }

    pub fn mark_completed(&mut self) {
        self.state = TaskState::Completed;
        self.lease_expires_at = None;
        self.updated_at = Instant::now();
    }

    pub fn mark_archived(&mut self, failure: Failure) {
        self.state = TaskState::Archived;
        self.last_error = Some(failure);
        self.lease_expires_at = None;
        self.updated_at = Instant::now();
    }

    pub fn schedule_retry(&mut self, next_run_at: Instant, failure: Failure) {
        self.state = TaskState::Retry;
        self.retried += 1;
        self.next_run_at = Some(next_run_at);
        self.last_error = Some(failure);
        self.lease_expires_at = None;
        self.updated_at = Instant::now();
    }

    /// Retry/Active -> Pending.
    pub fn requeue(&mut self) {
        self.state = TaskState::Pending;
        self.next_run_at = None;
        self.lease_expires_at = None;
        self.updated_at = Instant::now();
    }

    /// No retries left: the next retryable failure archives the task.
    pub fn retries_exhausted(&self) -> bool {
        self.retried >= self.envelope.retry_limit()
    }

    pub fn last_error_kind(&self) -> Option<ErrorKind> {
        self.last_error.as_ref().map(|f| f.kind)
    }
}
