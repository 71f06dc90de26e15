//! Minimum-interval request gate.

use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::debug;

/// Enforces a minimum spacing between consecutive requests, no matter how
/// often callers ask.
#[derive(Debug)]
pub struct RateLimiter {
    /// Minimum duration between requests.
    min_interval: Duration,

    /// Earliest instant the next request may start.
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Creates a limiter with the given minimum interval.
    #[must_use]
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            next_slot: Mutex::new(None),
        }
    }

    /// Returns the configured minimum interval.
    #[must_use]
    pub const fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Waits for the next free slot and claims it.
    ///
    /// Returns how long the caller waited. The lock is held while sleeping so
    /// concurrent callers queue up behind each other.
    pub async fn wait_and_acquire(&self) -> Duration {
        let mut next_slot = self.next_slot.lock().await;

        let wait = next_slot.map_or(Duration::ZERO, |slot| {
            slot.saturating_duration_since(Instant::now())
        });

        if !wait.is_zero() {
            debug!("Rate limiter: waiting {:?} before next request", wait);
            tokio::time::sleep(wait).await;
        }

        *next_slot = Some(Instant::now() + self.min_interval);
        wait
    }

    /// Pushes the next slot out by at least `delay` from now, e.g. after the
    /// remote side asked us to back off.
    pub async fn defer(&self, delay: Duration) {
        let mut next_slot = self.next_slot.lock().await;
        let candidate = Instant::now() + delay;
        *next_slot = Some(next_slot.map_or(candidate, |slot| slot.max(candidate)));
    }
}
