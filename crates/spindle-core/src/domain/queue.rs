//! Static queue priorities.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Queue a task is placed on at enqueue time.
///
/// Workers drain `Critical` ahead of `Default` ahead of `Low`. This is an
/// ordering hint only: redelivery and concurrent workers can reorder tasks.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum QueueName {
    Critical,
    #[default]
    Default,
    Low,
}

impl QueueName {
    /// All queues, highest priority first.
    pub const ALL: [QueueName; 3] = [QueueName::Critical, QueueName::Default, QueueName::Low];

    pub fn as_str(self) -> &'static str {
        match self {
            QueueName::Critical => "critical",
            QueueName::Default => "default",
            QueueName::Low => "low",
        }
    }

    /// Lower value = drained first.
    pub fn rank(self) -> u8 {
        match self {
            QueueName::Critical => 0,
            QueueName::Default => 1,
            QueueName::Low => 2,
        }
    }

    /// Sort and dedupe a queue list into drain order.
    pub fn drain_order(queues: &[QueueName]) -> Vec<QueueName> {
        let mut ordered = queues.to_vec();
        ordered.sort_by_key(|q| q.rank());
        ordered.dedup();
        ordered
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
