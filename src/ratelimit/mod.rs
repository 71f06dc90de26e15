//! Rate limiting shared by the marketplace and bot API clients.
//!
//! [`RateLimiter`] spaces out individual requests, while [`RateLimitState`]
//! tracks the quota a remote API reports and the adaptive polling interval
//! derived from it.

mod limiter;
mod state;

use std::sync::Arc;

use tokio::sync::RwLock;

pub use limiter::RateLimiter;
pub use state::{RateLimitHeaders, RateLimitState};

/// Rate-limit state shared between an API client (quota writer) and the
/// scheduler (interval writer, quota reader).
pub type SharedRateLimit = Arc<RwLock<RateLimitState>>;

/// Creates a shared state starting at `interval`.
#[must_use]
pub fn shared(interval: std::time::Duration) -> SharedRateLimit {
    Arc::new(RwLock::new(RateLimitState::new(interval)))
}
