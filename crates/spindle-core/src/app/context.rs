//! Per-delivery execution context.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::domain::{Delivery, DeliveryId};

/// Handed to every handler alongside the delivery.
///
/// The token is cancelled when the server shuts down or the per-task
/// deadline passes. Handlers doing long I/O should `select!` on
/// `cancelled()`.
#[derive(Debug, Clone)]
pub struct TaskContext {
    delivery_id: DeliveryId,
    attempt: u32,
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl TaskContext {
    pub fn new(delivery: &Delivery, deadline: Option<Instant>, cancel: CancellationToken) -> Self {
        Self {
            delivery_id: delivery.id,
            attempt: delivery.attempt(),
            deadline,
            cancel,
        }
    }

    /// Context with no deadline and a fresh token. For tests and ad-hoc runs.
    pub fn detached(delivery: &Delivery) -> Self {
        Self::new(delivery, None, CancellationToken::new())
    }

    pub fn delivery_id(&self) -> DeliveryId {
        self.delivery_id
    }

    /// 1-based attempt number.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }
}
