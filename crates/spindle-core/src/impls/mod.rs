//! Impls - adapters for the ports.
//!
//! - **InMemoryBroker**: queue broker for development and tests
//! - **InMemoryIdempotencyStore**: TTL map, with fault injection
//! - **RedisIdempotencyStore**: production store (`redis` feature)

pub mod memory_broker;
pub mod memory_store;
#[cfg(feature = "redis")]
pub mod redis_store;

pub use self::memory_broker::{InMemoryBroker, QueueCounts, RetryPolicy, TaskInfo};
pub use self::memory_store::InMemoryIdempotencyStore;
#[cfg(feature = "redis")]
pub use self::redis_store::RedisIdempotencyStore;
