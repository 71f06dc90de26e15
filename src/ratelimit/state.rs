//! Remote quota tracking.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use tracing::debug;

/// Reset values above this are absolute Unix timestamps, below it deltas.
const EPOCH_THRESHOLD: u64 = 1_000_000_000;

/// Rate-limit information extracted from one response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimitHeaders {
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
    /// Time until the quota resets, relative to the response.
    pub reset_after: Option<Duration>,
}

impl RateLimitHeaders {
    /// Parses `X-Ratelimit-*`, `X-Rate-Limit-*` and `Retry-After` headers.
    ///
    /// Unparsable values are ignored.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap, now: DateTime<Utc>) -> Self {
        let mut parsed = Self::default();

        for (name, value) in headers {
            let Ok(value) = value.to_str() else {
                continue;
            };
            let value = value.trim();

            // Header names are stored lowercase.
            match name.as_str() {
                "x-ratelimit-limit" | "x-rate-limit-limit" => {
                    parsed.limit = parsed.limit.or_else(|| value.parse().ok());
                }
                "x-ratelimit-remaining" | "x-rate-limit-remaining" => {
                    parsed.remaining = parsed.remaining.or_else(|| value.parse().ok());
                }
                "x-ratelimit-reset" | "x-rate-limit-reset" => {
                    if let Some(reset) = parse_reset(value, now) {
                        parsed.reset_after = Some(parsed.reset_after.map_or(reset, |r| r.max(reset)));
                    }
                }
                _ => {}
            }
        }

        if let Some(retry) = headers
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
        {
            parsed.reset_after = Some(parsed.reset_after.map_or(retry, |r| r.max(retry)));
        }

        parsed
    }

    /// True if the response carried no rate-limit information at all.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.limit.is_none() && self.remaining.is_none() && self.reset_after.is_none()
    }
}

fn parse_reset(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let raw: u64 = value.parse().ok()?;
    if raw < EPOCH_THRESHOLD {
        return Some(Duration::from_secs(raw));
    }

    let reset_at = DateTime::from_timestamp(i64::try_from(raw).ok()?, 0)?;
    Some((reset_at - now).to_std().unwrap_or(Duration::ZERO))
}

/// Quota reported by one API target plus the polling interval derived from it.
///
/// Lives only in memory; after a restart it starts from the default interval
/// and re-adapts from the next responses.
#[derive(Debug, Clone)]
pub struct RateLimitState {
    /// Requests allowed per window, if the API told us.
    pub limit: Option<u32>,

    /// Requests left in the current window, if the API told us.
    pub remaining: Option<u32>,

    /// When the current window ends.
    pub reset_at: Option<DateTime<Utc>>,

    /// When the quota fields were last written.
    pub updated_at: Option<DateTime<Utc>>,

    /// Current adaptive polling interval.
    interval: Duration,
}

impl RateLimitState {
    /// Creates an empty state with the given starting interval.
    #[must_use]
    pub const fn new(interval: Duration) -> Self {
        Self {
            limit: None,
            remaining: None,
            reset_at: None,
            updated_at: None,
            interval,
        }
    }

    /// Applies the quota information of one response.
    pub fn record(&mut self, headers: RateLimitHeaders, now: DateTime<Utc>) {
        if headers.limit.is_some() {
            self.limit = headers.limit;
        }
        if headers.remaining.is_some() {
            self.remaining = headers.remaining;
        }
        if let Some(reset) = headers.reset_after {
            self.reset_at = TimeDelta::from_std(reset).ok().map(|delta| now + delta);
        } else if headers.remaining.is_some() && self.reset_at.is_some_and(|r| r <= now) {
            // The reading belongs to a window whose end we were never told.
            self.reset_at = None;
        }
        self.updated_at = Some(now);

        if !headers.is_empty() {
            debug!(
                "Rate limit updated: {:?}/{:?} remaining, reset at {:?}",
                self.remaining, self.limit, self.reset_at
            );
        }
    }

    /// Records that the API refused a request for exceeding its quota.
    pub fn record_throttled(&mut self, retry_after: Option<Duration>, now: DateTime<Utc>) {
        self.remaining = Some(0);
        if let Some(delta) = retry_after.and_then(|d| TimeDelta::from_std(d).ok()) {
            let candidate = now + delta;
            self.reset_at = Some(self.reset_at.map_or(candidate, |r| r.max(candidate)));
        }
        self.updated_at = Some(now);
    }

    /// Remaining quota, or `None` when unknown or the window already reset.
    #[must_use]
    pub fn effective_remaining(&self, now: DateTime<Utc>) -> Option<u32> {
        match self.reset_at {
            Some(reset_at) if reset_at <= now => None,
            _ => self.remaining,
        }
    }

    /// True when at most one request is left and the window has not reset yet.
    #[must_use]
    pub fn is_exhausted(&self, now: DateTime<Utc>) -> bool {
        self.effective_remaining(now).is_some_and(|r| r <= 1)
            && self.reset_at.is_some_and(|reset_at| reset_at > now)
    }

    /// Time until the window resets, if known and in the future.
    #[must_use]
    pub fn time_until_reset(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.reset_at
            .and_then(|reset_at| (reset_at - now).to_std().ok())
            .filter(|d| !d.is_zero())
    }

    /// Current adaptive polling interval.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Replaces the adaptive polling interval.
    pub const fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }

    /// One-line quota summary for logs.
    #[must_use]
    pub fn status_line(&self) -> String {
        match (self.remaining, self.limit) {
            (Some(remaining), Some(limit)) if limit > 0 => {
                let percent = u64::from(remaining) * 100 / u64::from(limit);
                format!("{remaining}/{limit} requests left ({percent}%)")
            }
            (Some(remaining), _) => format!("{remaining} requests left (limit unknown)"),
            (None, Some(limit)) => format!("limit {limit} requests (remaining unknown)"),
            (None, None) => "no quota reported yet".to_owned(),
        }
    }
}
