//! Project Monitor Library
//!
//! Watches the Freelancehunt project feed and notifies Telegram users about
//! new projects that match their filters.
//!
//! This crate provides the core functionality for:
//! - Loading and validating filter profiles and settings
//! - Fetching new projects under the API's rate limits
//! - Deduplicating projects across overlapping fetch windows
//! - Evaluating projects against per-user filters
//! - Delivering notifications through the Telegram Bot API

pub mod backoff;
pub mod config;
pub mod error;
pub mod filter;
pub mod ingest;
pub mod marketplace;
pub mod model;
pub mod notify;
pub mod ratelimit;
pub mod scheduler;
pub mod store;
