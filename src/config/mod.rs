//! Configuration module for the project monitor.
//!
//! Handles loading and validation of runtime settings, API credentials and
//! the subscriber filter profiles.

mod profiles;
mod settings;

pub use profiles::{ProfileBook, ProfileBookError};
pub use settings::{ApiCredentials, ConfigError, IngestMode, IngestSettings, MonitorSettings};
