//! Retry policy: decides backoff delays.

use std::time::Duration;

/// Retry ceiling applied when the caller does not override it.
pub const DEFAULT_MAX_RETRY: u32 = 25;

/// Retry policy for failed tasks.
///
/// Exponential backoff capped at `max_delay`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Backoff multiplier.
    pub multiplier: f64,

    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            multiplier: 2.0,
            max_delay: Duration::from_secs(10 * 60),
        }
    }
}

impl RetryPolicy {
    /// Fixed delay, mostly for tests.
    pub fn constant(delay: Duration) -> Self {
        Self {
            base_delay: delay,
            multiplier: 1.0,
            max_delay: delay,
        }
    }

    /// Delay before the next attempt.
    ///
    /// `retried` is the number of failures so far, including the one being
    /// handled (1-indexed): delay = base_delay * multiplier^(retried - 1),
    /// capped at `max_delay`.
    ///
    /// Example with base_delay=2s, multiplier=2.0:
    /// - retried 1: 2s
    /// - retried 2: 4s
    /// - retried 3: 8s
    pub fn next_delay(&self, retried: u32) -> Duration {
        let exponent = i32::try_from(retried.saturating_sub(1)).unwrap_or(i32::MAX);
        let delay_secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        // powi can overflow to inf; min() keeps it finite
        let capped = delay_secs.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }
}
