//! Domain model: task types, envelopes, deliveries, states and handler errors.

pub mod envelope;
pub mod errors;
pub mod ids;
pub mod queue;
pub mod state;
pub mod task_type;

pub use self::envelope::{DEFAULT_MAX_RETRY, Delivery, TaskEnvelope};
pub use self::errors::{ErrorKind, Failure, HandlerError};
pub use self::ids::{DeliveryId, EventId};
pub use self::queue::QueueName;
pub use self::state::TaskState;
pub use self::task_type::TaskType;
