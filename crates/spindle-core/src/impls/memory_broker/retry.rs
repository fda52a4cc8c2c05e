//! Retry policy: decides backoff delays.

use std::time::Duration;

/// Exponential backoff for retryable failures.
///
/// delay = base_delay * multiplier^(retried - 1), capped at `max_delay`.
///
/// Example with base_delay=2s, multiplier=2.0:
/// - 1st retry: 2s
/// - 2nd retry: 4s
/// - 3rd retry: 8s
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, multiplier: f64, max_delay: Duration) -> Self {
        Self {
            base_delay,
            multiplier,
            max_delay,
        }
    }

    /// No delay between attempts. Handy in tests.
    pub fn immediate() -> Self {
        Self::new(Duration::ZERO, 1.0, Duration::ZERO)
    }

    /// Delay before retry number `retried` (1-based).
    pub fn next_delay(&self, retried: u32) -> Duration {
        let exponent = retried.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(2), 2.0, Duration::from_secs(600))
    }
}
