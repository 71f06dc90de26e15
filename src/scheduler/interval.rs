//! Adaptive polling interval.
//!
//! Pure functions of the current interval and the observed quota, so the
//! adaptation can be tested without timers.

use std::time::Duration;

use crate::backoff::exponential;
use crate::config::MonitorSettings;

/// Bounds and thresholds for the polling interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalPolicy {
    pub default: Duration,
    pub min: Duration,
    pub max: Duration,
    /// Remaining quota at or above which the interval may relax.
    pub warning_threshold: u32,
    /// Remaining quota below which the interval widens.
    pub critical_threshold: u32,
}

impl IntervalPolicy {
    /// Builds the policy from monitor settings.
    #[must_use]
    pub const fn from_settings(settings: &MonitorSettings) -> Self {
        Self {
            default: settings.default_check_interval(),
            min: settings.min_check_interval(),
            max: settings.max_check_interval(),
            warning_threshold: settings.rate_limit_warning_threshold,
            critical_threshold: settings.rate_limit_critical_threshold,
        }
    }

    /// Interval after a successful fetch.
    ///
    /// Below the critical threshold the interval doubles toward `max`. Above
    /// the warning threshold (or with no quota information) an interval that
    /// was widened halves back toward `default`. In between it holds.
    #[must_use]
    pub fn after_success(&self, current: Duration, remaining: Option<u32>) -> Duration {
        let next = match remaining {
            Some(r) if r < self.critical_threshold => current.saturating_mul(2),
            Some(r) if r < self.warning_threshold => current,
            _ if current > self.default => (current / 2).max(self.default),
            _ => current,
        };
        self.clamp(next)
    }

    /// Interval after a throttled or transient failure.
    ///
    /// Doubles with every consecutive failure, starting from the larger of
    /// `current` and `default`, and is never shorter than the time the API
    /// told us to wait.
    #[must_use]
    pub fn after_failure(&self, current: Duration, wait_hint: Option<Duration>) -> Duration {
        let backoff = exponential(current.max(self.default), 1);
        let next = wait_hint.map_or(backoff, |hint| backoff.max(hint));
        self.clamp(next)
    }

    /// Keeps `interval` within `[min, max]`.
    #[must_use]
    pub fn clamp(&self, interval: Duration) -> Duration {
        interval.clamp(self.min, self.max.max(self.min))
    }
}
