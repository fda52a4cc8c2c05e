//! Dispatch patterns built on the enqueue side.
//!
//! - **FireAndForget**: background enqueue with a timeout, failures only logged
//! - **Scheduler**: cron entries enqueued on time, evaluated in UTC
//! - **FanoutRegistry / FanoutPublisher**: one event, one task per handler

pub mod fanout;
pub mod fire_and_forget;
pub mod scheduler;

pub use self::fanout::{FanoutDelivery, FanoutEvent, FanoutPublisher, FanoutRegistry, Subscription};
pub use self::fire_and_forget::FireAndForget;
pub use self::scheduler::{ScheduleEntry, ScheduledEnqueue, Scheduler};
