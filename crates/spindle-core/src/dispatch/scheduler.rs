//! Cron-driven enqueuer.
//!
//! One loop, no handler logic: at each firing the entry's envelope is
//! enqueued and the worker server does the rest. Cron expressions are
//! evaluated in UTC. Missed firings are skipped, not backfilled.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use croner::Cron;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::{DeliveryId, QueueName, TaskEnvelope, TaskType};
use crate::error::{EnqueueError, ScheduleError};
use crate::ports::{Clock, TaskEnqueuer};
use crate::telemetry::{SCHEDULED_ENQUEUES, STATUS_FAILURE, STATUS_SUCCESS};

/// A named cron schedule and the task it produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleEntry {
    pub name: String,
    pub cron: String,
    pub task_type: TaskType,
    pub payload: Vec<u8>,
    pub queue: Option<QueueName>,
    pub max_retry: Option<u32>,
}

impl ScheduleEntry {
    pub fn new(name: impl Into<String>, cron: impl Into<String>, task_type: TaskType) -> Self {
        Self {
            name: name.into(),
            cron: cron.into(),
            task_type,
            payload: Vec::new(),
            queue: None,
            max_retry: None,
        }
    }

    pub fn payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn json<T: Serialize>(self, value: &T) -> Result<Self, serde_json::Error> {
        Ok(self.payload(serde_json::to_vec(value)?))
    }

    pub fn queue(mut self, queue: QueueName) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn max_retry(mut self, max_retry: u32) -> Self {
        self.max_retry = Some(max_retry);
        self
    }

    /// A fresh envelope from the payload template.
    pub fn envelope(&self) -> TaskEnvelope {
        let mut envelope = TaskEnvelope::new(self.task_type.clone(), self.payload.clone());
        if let Some(queue) = self.queue {
            envelope = envelope.queue(queue);
        }
        if let Some(max_retry) = self.max_retry {
            envelope = envelope.max_retry(max_retry);
        }
        envelope
    }
}

/// Outcome of one firing.
#[derive(Debug)]
pub struct ScheduledEnqueue {
    pub schedule: String,
    pub fired_at: DateTime<Utc>,
    pub result: Result<DeliveryId, EnqueueError>,
}

struct Slot {
    entry: ScheduleEntry,
    cron: Cron,
    next_fire: Option<DateTime<Utc>>,
}

pub struct Scheduler {
    enqueuer: Arc<dyn TaskEnqueuer>,
    clock: Arc<dyn Clock>,
    slots: Vec<Slot>,
}

impl Scheduler {
    pub fn new(enqueuer: Arc<dyn TaskEnqueuer>, clock: Arc<dyn Clock>) -> Self {
        Self {
            enqueuer,
            clock,
            slots: Vec::new(),
        }
    }

    /// Register an entry. Its first firing is the first match strictly after
    /// the clock's current time.
    pub fn add(&mut self, entry: ScheduleEntry) -> Result<(), ScheduleError> {
        if self.slots.iter().any(|s| s.entry.name == entry.name) {
            return Err(ScheduleError::DuplicateName(entry.name));
        }
        let cron = Cron::new(&entry.cron)
            .parse()
            .map_err(|e| ScheduleError::InvalidCron {
                name: entry.name.clone(),
                expression: entry.cron.clone(),
                reason: e.to_string(),
            })?;
        let next_fire = next_after(&cron, self.clock.now());

        info!(
            schedule = %entry.name,
            cron = %entry.cron,
            task_type = %entry.task_type,
            next_fire = ?next_fire,
            "schedule registered"
        );
        self.slots.push(Slot {
            entry,
            cron,
            next_fire,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn next_fire(&self, name: &str) -> Option<DateTime<Utc>> {
        self.slots
            .iter()
            .find(|s| s.entry.name == name)
            .and_then(|s| s.next_fire)
    }

    /// Earliest upcoming firing across all entries.
    pub fn earliest_fire(&self) -> Option<DateTime<Utc>> {
        self.slots.iter().filter_map(|s| s.next_fire).min()
    }

    /// Enqueue once for every entry due at `now`, then move each fired entry
    /// to its first match strictly after `now`.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> Vec<ScheduledEnqueue> {
        let mut fired = Vec::new();
        for slot in &mut self.slots {
            let Some(due) = slot.next_fire else {
                continue;
            };
            if due > now {
                continue;
            }

            let result = self.enqueuer.enqueue(slot.entry.envelope()).await;
            let status = match &result {
                Ok(id) => {
                    debug!(schedule = %slot.entry.name, delivery_id = %id, "scheduled task enqueued");
                    STATUS_SUCCESS
                }
                Err(e) => {
                    warn!(schedule = %slot.entry.name, error = %e, "scheduled enqueue failed");
                    STATUS_FAILURE
                }
            };
            metrics::counter!(
                SCHEDULED_ENQUEUES,
                "schedule" => slot.entry.name.clone(),
                "status" => status
            )
            .increment(1);

            slot.next_fire = next_after(&slot.cron, now);
            fired.push(ScheduledEnqueue {
                schedule: slot.entry.name.clone(),
                fired_at: due,
                result,
            });
        }
        fired
    }

    /// Sleep until the next firing, tick, repeat. Returns when `shutdown` is
    /// cancelled.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(schedules = self.slots.len(), "scheduler started");
        loop {
            let now = self.clock.now();
            let wait = match self.earliest_fire() {
                Some(next) => (next - now).to_std().unwrap_or(Duration::ZERO),
                None => {
                    shutdown.cancelled().await;
                    break;
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(wait) => {},
            }
            let now = self.clock.now();
            self.tick(now).await;
        }
        info!("scheduler stopped");
    }
}

fn next_after(cron: &Cron, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    cron.find_next_occurrence(&now, false).ok()
}
