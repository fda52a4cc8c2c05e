//! Broker-side task states.

use serde::{Deserialize, Serialize};

/// Task state.
///
/// State transitions:
/// - Pending -> Active -> Completed
/// - Pending -> Active -> Retry -> Pending (backoff, until max_retry)
/// - Pending -> Active -> Archived (non-retryable error or retries exhausted)
/// - Pending -> Active -> Pending (released on shutdown or lease expiry; no retry consumed)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Ready to be leased.
    Pending,

    /// Leased by a worker.
    Active,

    /// Waiting out a retry backoff.
    Retry,

    /// Handler succeeded.
    Completed,

    /// Dead: will never be redelivered.
    Archived,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Archived)
    }

    pub fn is_leasable(self) -> bool {
        matches!(self, TaskState::Pending)
    }
}
