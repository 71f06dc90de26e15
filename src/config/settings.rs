//! Application settings and API credentials.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::marketplace::DEFAULT_BASE_URL as DEFAULT_MARKETPLACE_URL;
use crate::notify::DEFAULT_BOT_API_URL;

/// Tokens and endpoints of the two remote APIs.
#[derive(Clone, Serialize, Deserialize)]
pub struct ApiCredentials {
    /// Telegram bot token from `BotFather`.
    pub telegram_bot_token: String,

    /// Freelancehunt API token.
    pub freelancehunt_token: String,

    #[serde(default = "default_marketplace_url")]
    pub marketplace_url: String,

    #[serde(default = "default_bot_api_url")]
    pub bot_api_url: String,
}

fn default_marketplace_url() -> String {
    DEFAULT_MARKETPLACE_URL.to_owned()
}

fn default_bot_api_url() -> String {
    DEFAULT_BOT_API_URL.to_owned()
}

impl ApiCredentials {
    /// Creates credentials from environment variables.
    ///
    /// Expects `TELEGRAM_BOT_TOKEN` and `FREELANCEHUNT_TOKEN` to be set.
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            telegram_bot_token: required_env("TELEGRAM_BOT_TOKEN")?,
            freelancehunt_token: required_env("FREELANCEHUNT_TOKEN")?,
            marketplace_url: std::env::var("FREELANCEHUNT_API_URL")
                .unwrap_or_else(|_| default_marketplace_url()),
            bot_api_url: std::env::var("TELEGRAM_API_URL").unwrap_or_else(|_| default_bot_api_url()),
        })
    }
}

impl std::fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("marketplace_url", &self.marketplace_url)
            .field("bot_api_url", &self.bot_api_url)
            .finish_non_exhaustive()
    }
}

fn required_env(name: &'static str) -> Result<String, ConfigError> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::MissingEnvVar(name))
}

/// Tuning of the monitor, the clients and the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorSettings {
    /// Polling interval when the quota is healthy, in seconds.
    pub default_check_interval_secs: u64,

    /// Lower bound of the adaptive interval, in seconds.
    pub min_check_interval_secs: u64,

    /// Upper bound of the adaptive interval, in seconds.
    pub max_check_interval_secs: u64,

    /// Minimum spacing between two marketplace requests, in seconds.
    pub min_api_request_interval_secs: f64,

    /// Remaining-quota count below which the client slows down.
    pub rate_limit_warning_threshold: u32,

    /// Remaining-quota count below which the interval widens.
    pub rate_limit_critical_threshold: u32,

    /// How long seen markers are kept, in days.
    pub seen_retention_days: u32,

    /// Delivery attempts per notification, including the first.
    pub dispatch_max_attempts: u32,

    /// Notifications delivered in parallel.
    pub dispatch_concurrency: usize,

    /// Grace period for in-flight deliveries on shutdown, in seconds.
    pub dispatch_drain_timeout_secs: u64,

    /// Minimum spacing between two bot API sends, in milliseconds.
    pub bot_min_send_interval_ms: u64,

    /// Pages followed per fetch.
    pub max_fetch_pages: u32,

    pub profiles_path: PathBuf,
    pub seen_store_path: PathBuf,
    pub state_path: PathBuf,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            default_check_interval_secs: 60,
            min_check_interval_secs: 30,
            max_check_interval_secs: 3600,
            min_api_request_interval_secs: 1.0,
            rate_limit_warning_threshold: 20,
            rate_limit_critical_threshold: 10,
            seen_retention_days: 30,
            dispatch_max_attempts: 3,
            dispatch_concurrency: 4,
            dispatch_drain_timeout_secs: 10,
            bot_min_send_interval_ms: 50,
            max_fetch_pages: 3,
            profiles_path: PathBuf::from("profiles.json"),
            seen_store_path: PathBuf::from("seen_projects.json"),
            state_path: PathBuf::from("monitor_state.json"),
        }
    }
}

impl MonitorSettings {
    /// Creates settings from environment variables, falling back to the
    /// default for anything missing or unparsable.
    #[must_use]
    pub fn from_env_with_defaults() -> Self {
        let d = Self::default();
        Self {
            default_check_interval_secs: env_or("DEFAULT_CHECK_INTERVAL", d.default_check_interval_secs),
            min_check_interval_secs: env_or("MIN_CHECK_INTERVAL", d.min_check_interval_secs),
            max_check_interval_secs: env_or("MAX_CHECK_INTERVAL", d.max_check_interval_secs),
            min_api_request_interval_secs: env_or(
                "MIN_API_REQUEST_INTERVAL",
                d.min_api_request_interval_secs,
            ),
            rate_limit_warning_threshold: env_or(
                "RATE_LIMIT_WARNING_THRESHOLD",
                d.rate_limit_warning_threshold,
            ),
            rate_limit_critical_threshold: env_or(
                "RATE_LIMIT_CRITICAL_THRESHOLD",
                d.rate_limit_critical_threshold,
            ),
            seen_retention_days: env_or("SEEN_RETENTION_DAYS", d.seen_retention_days),
            dispatch_max_attempts: env_or("DISPATCH_MAX_ATTEMPTS", d.dispatch_max_attempts),
            dispatch_concurrency: env_or("DISPATCH_CONCURRENCY", d.dispatch_concurrency),
            dispatch_drain_timeout_secs: env_or(
                "DISPATCH_DRAIN_TIMEOUT",
                d.dispatch_drain_timeout_secs,
            ),
            bot_min_send_interval_ms: env_or("BOT_MIN_SEND_INTERVAL_MS", d.bot_min_send_interval_ms),
            max_fetch_pages: env_or("MAX_FETCH_PAGES", d.max_fetch_pages),
            profiles_path: std::env::var("PROFILES_PATH").map_or(d.profiles_path, PathBuf::from),
            seen_store_path: std::env::var("SEEN_STORE_PATH")
                .map_or(d.seen_store_path, PathBuf::from),
            state_path: std::env::var("STATE_PATH").map_or(d.state_path, PathBuf::from),
        }
    }

    /// Checks that the bounds are consistent.
    ///
    /// # Errors
    ///
    /// Returns the first inconsistent setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_check_interval_secs == 0 {
            return Err(ConfigError::InvalidSetting(
                "MIN_CHECK_INTERVAL must be positive".to_owned(),
            ));
        }
        if !(self.min_check_interval_secs <= self.default_check_interval_secs
            && self.default_check_interval_secs <= self.max_check_interval_secs)
        {
            return Err(ConfigError::InvalidSetting(format!(
                "check intervals must satisfy min <= default <= max (got {} / {} / {})",
                self.min_check_interval_secs,
                self.default_check_interval_secs,
                self.max_check_interval_secs
            )));
        }
        if self.rate_limit_critical_threshold > self.rate_limit_warning_threshold {
            return Err(ConfigError::InvalidSetting(format!(
                "RATE_LIMIT_CRITICAL_THRESHOLD ({}) must not exceed RATE_LIMIT_WARNING_THRESHOLD ({})",
                self.rate_limit_critical_threshold, self.rate_limit_warning_threshold
            )));
        }
        if !self.min_api_request_interval_secs.is_finite() || self.min_api_request_interval_secs < 0.0 {
            return Err(ConfigError::InvalidSetting(
                "MIN_API_REQUEST_INTERVAL must be a non-negative number".to_owned(),
            ));
        }
        if self.dispatch_max_attempts == 0 {
            return Err(ConfigError::InvalidSetting(
                "DISPATCH_MAX_ATTEMPTS must be at least 1".to_owned(),
            ));
        }
        if self.dispatch_concurrency == 0 {
            return Err(ConfigError::InvalidSetting(
                "DISPATCH_CONCURRENCY must be at least 1".to_owned(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub const fn default_check_interval(&self) -> Duration {
        Duration::from_secs(self.default_check_interval_secs)
    }

    #[must_use]
    pub const fn min_check_interval(&self) -> Duration {
        Duration::from_secs(self.min_check_interval_secs)
    }

    #[must_use]
    pub const fn max_check_interval(&self) -> Duration {
        Duration::from_secs(self.max_check_interval_secs)
    }

    #[must_use]
    pub fn min_api_request_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.min_api_request_interval_secs).unwrap_or(Duration::ZERO)
    }

    #[must_use]
    pub const fn dispatch_drain_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch_drain_timeout_secs)
    }

    #[must_use]
    pub const fn bot_min_send_interval(&self) -> Duration {
        Duration::from_millis(self.bot_min_send_interval_ms)
    }
}

/// How new projects reach the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestMode {
    Polling,
    Webhook,
}

impl std::str::FromStr for IngestMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "polling" | "poll" => Ok(Self::Polling),
            "webhook" => Ok(Self::Webhook),
            other => Err(ConfigError::InvalidSetting(format!(
                "unknown INGEST_MODE '{other}' (expected polling or webhook)"
            ))),
        }
    }
}

/// HTTP listener for the webhook and health endpoints.
#[derive(Clone, Serialize, Deserialize)]
pub struct IngestSettings {
    pub mode: IngestMode,
    pub host: String,
    pub port: u16,
    pub webhook_path: String,
    /// Shared secret pushed webhooks must carry; required in webhook mode.
    #[serde(skip)]
    pub webhook_secret: Option<String>,
    /// Serve `/health` even in polling mode.
    pub health_enabled: bool,
}

impl std::fmt::Debug for IngestSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestSettings")
            .field("mode", &self.mode)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("webhook_path", &self.webhook_path)
            .field(
                "webhook_secret",
                &self.webhook_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("health_enabled", &self.health_enabled)
            .finish()
    }
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            mode: IngestMode::Polling,
            host: "0.0.0.0".to_owned(),
            port: 8080,
            webhook_path: "/webhook".to_owned(),
            webhook_secret: None,
            health_enabled: true,
        }
    }
}

impl IngestSettings {
    /// Creates listener settings from environment variables with defaults.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown `INGEST_MODE`, or when webhook mode
    /// has no `WEBHOOK_SECRET`.
    pub fn from_env_with_defaults() -> Result<Self, ConfigError> {
        let d = Self::default();
        let mode = match std::env::var("INGEST_MODE") {
            Ok(value) => value.parse()?,
            Err(_) => d.mode,
        };

        let mut webhook_path = std::env::var("WEBHOOK_PATH").unwrap_or(d.webhook_path);
        if !webhook_path.starts_with('/') {
            webhook_path.insert(0, '/');
        }

        let settings = Self {
            mode,
            host: std::env::var("WEBAPP_HOST").unwrap_or(d.host),
            port: env_or("WEBAPP_PORT", d.port),
            webhook_path,
            webhook_secret: std::env::var("WEBHOOK_SECRET")
                .ok()
                .map(|s| s.trim().to_owned())
                .filter(|s| !s.is_empty()),
            health_enabled: env_or("HEALTH_ENABLED", d.health_enabled),
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Validates the listener settings.
    ///
    /// # Errors
    ///
    /// Returns an error when webhook mode has no secret to check callers
    /// against.
    pub const fn validate(&self) -> Result<(), ConfigError> {
        if matches!(self.mode, IngestMode::Webhook) && self.webhook_secret.is_none() {
            return Err(ConfigError::MissingEnvVar("WEBHOOK_SECRET"));
        }
        Ok(())
    }

    /// Whether an HTTP listener is needed at all.
    #[must_use]
    pub fn needs_listener(&self) -> bool {
        self.mode == IngestMode::Webhook || self.health_enabled
    }

    /// Socket address to bind.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Invalid setting: {0}")]
    InvalidSetting(String),
}
