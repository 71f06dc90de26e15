//! Freelancehunt marketplace API.
//!
//! Provides the polling [`MarketplaceClient`] and the wire format shared with
//! the webhook receiver.

mod client;
pub mod wire;

pub use client::{DEFAULT_BASE_URL, MarketplaceClient, MarketplaceConfig, MarketplaceError};
