//! IdGenerator port - id generation behind a trait so tests can pin time.

use ulid::Ulid;

use crate::domain::ids::{DeliveryId, EventId};
use crate::ports::Clock;

pub trait IdGenerator: Send + Sync {
    fn generate_delivery_id(&self) -> DeliveryId;

    fn generate_event_id(&self) -> EventId;
}

/// ULID generator. The timestamp part comes from the injected clock, the
/// random part from `rand`.
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_delivery_id(&self) -> DeliveryId {
        DeliveryId::from(self.next())
    }

    fn generate_event_id(&self) -> EventId {
        EventId::from(self.next())
    }
}
