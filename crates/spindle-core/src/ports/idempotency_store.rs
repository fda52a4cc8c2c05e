//! IdempotencyStore port - a key-value store with atomic set-if-absent.
//!
//! Backed by Redis (`SET NX PX`) in production and by
//! `InMemoryIdempotencyStore` in tests. Every mutation is a single atomic
//! store operation; nothing is locked in process memory.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Value stored under an idempotency key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyState {
    InProgress,
    Completed,
}

impl IdempotencyState {
    pub fn as_str(self) -> &'static str {
        match self {
            IdempotencyState::InProgress => "in_progress",
            IdempotencyState::Completed => "completed",
        }
    }
}

impl fmt::Display for IdempotencyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IdempotencyState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(IdempotencyState::InProgress),
            "completed" => Ok(IdempotencyState::Completed),
            other => Err(other.to_string()),
        }
    }
}

#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Atomically store `state` if `key` is absent. `true` if this call set it.
    async fn set_if_absent(
        &self,
        key: &str,
        state: IdempotencyState,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    /// Unconditionally store `state`, refreshing the TTL.
    async fn set(&self, key: &str, state: IdempotencyState, ttl: Duration)
    -> Result<(), StoreError>;

    async fn get(&self, key: &str) -> Result<Option<IdempotencyState>, StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Take `key` as `InProgress` on behalf of `owner`, if absent.
    async fn acquire(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Delete `key` only while it is still `InProgress` under `owner`.
    /// `false` when the lock expired or someone else holds it now.
    async fn release(&self, key: &str, owner: &str) -> Result<bool, StoreError>;
}
