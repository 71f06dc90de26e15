//! Retry delays as pure functions of the attempt count.

use std::time::Duration;

/// Bounded exponential retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,

    /// Delay after the first failed attempt.
    pub base_delay: Duration,

    /// Upper bound for the computed exponential delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with the given attempt limit and default delays.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// Whether another attempt is allowed after `attempts` have failed.
    #[must_use]
    pub const fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Delay before the next attempt, or `None` once attempts are exhausted.
    ///
    /// `hint` is a server supplied wait (e.g. `retry_after`); the result is
    /// never shorter than it, even when it exceeds `max_delay`.
    #[must_use]
    pub fn next_delay(&self, attempts: u32, hint: Option<Duration>) -> Option<Duration> {
        if attempts == 0 || !self.should_retry(attempts) {
            return None;
        }

        let computed = exponential(self.base_delay, attempts - 1).min(self.max_delay);
        Some(hint.map_or(computed, |hint| computed.max(hint)))
    }
}

/// `base * 2^exponent`, saturating.
pub(crate) fn exponential(base: Duration, exponent: u32) -> Duration {
    let factor = 2u32.checked_pow(exponent).unwrap_or(u32::MAX);
    base.saturating_mul(factor)
}
