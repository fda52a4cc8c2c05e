//! Broker port - the consuming side of the queue.

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{Delivery, Failure, QueueName};
use crate::error::BrokerError;

/// A leased delivery. The worker owns the lease and settles it exactly once
/// with `ack`, `fail` or `release`; dropping it unsettled leaves the delivery
/// to the broker's lease-expiry recovery.
#[async_trait]
pub trait DeliveryLease: Send {
    fn delivery(&self) -> &Delivery;

    /// Handler succeeded.
    async fn ack(self: Box<Self>) -> Result<(), BrokerError>;

    /// Handler failed. The broker decides between retry and archive.
    async fn fail(self: Box<Self>, failure: Failure) -> Result<(), BrokerError>;

    /// Give the delivery back untouched (shutdown). Does not consume a retry.
    async fn release(self: Box<Self>) -> Result<(), BrokerError>;
}

/// Consuming side of the broker.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Lease the next delivery from `queues`, highest priority first.
    /// Waits up to `wait` and returns `None` if nothing became ready.
    async fn lease(
        &self,
        queues: &[QueueName],
        wait: Duration,
    ) -> Result<Option<Box<dyn DeliveryLease>>, BrokerError>;
}
