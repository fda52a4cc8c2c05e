//! Ports - seams to the external collaborators.
//!
//! - **TaskEnqueuer** / **Broker**: the queue broker, producing and consuming side
//! - **IdempotencyStore**: distributed key-value store for idempotency locks
//! - **Clock** / **IdGenerator**: time and ids, swappable in tests

pub mod broker;
pub mod clock;
pub mod enqueuer;
pub mod id_generator;
pub mod idempotency_store;

pub use self::broker::{Broker, DeliveryLease};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::enqueuer::TaskEnqueuer;
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::idempotency_store::{IdempotencyState, IdempotencyStore};
