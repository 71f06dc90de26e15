//! Bot API client sending project notifications.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::format::{OPEN_PROJECT_LABEL, project_message};
use super::{DeliveryOutcome, MessageSender};
use crate::model::{Project, UserId};
use crate::ratelimit::{RateLimitHeaders, RateLimiter, SharedRateLimit};

/// Bot API failures that retrying the same message cannot fix.
#[derive(Debug, Error)]
pub enum BotApiError {
    #[error("Bot token rejected (HTTP {status}): {description}")]
    InvalidToken { status: u16, description: String },

    #[error("Bot API refused the message (HTTP {status}): {description}")]
    BadRequest { status: u16, description: String },

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
}

impl BotApiError {
    /// Whether every further send would fail the same way.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::InvalidToken { .. } | Self::Client(_))
    }
}

/// Envelope of every Bot API response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BotResponse {
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: Option<ResponseParameters>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponseParameters {
    #[serde(default)]
    pub retry_after: Option<u64>,
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: UserId,
    text: &'a str,
    parse_mode: &'static str,
    disable_web_page_preview: bool,
    reply_markup: InlineKeyboard<'a>,
}

#[derive(Debug, Serialize)]
struct InlineKeyboard<'a> {
    inline_keyboard: [[UrlButton<'a>; 1]; 1],
}

#[derive(Debug, Serialize)]
struct UrlButton<'a> {
    text: &'static str,
    url: &'a str,
}

/// Maps an HTTP status and decoded body to a delivery outcome.
///
/// # Errors
///
/// Returns [`BotApiError::InvalidToken`] for 401/404 and
/// [`BotApiError::BadRequest`] for other client errors that do not mean the
/// user is gone.
pub fn classify_response(status: u16, body: &BotResponse) -> Result<DeliveryOutcome, BotApiError> {
    let description = body
        .description
        .clone()
        .unwrap_or_else(|| format!("HTTP {status}"));

    match status {
        200..=299 if body.ok => Ok(DeliveryOutcome::Delivered),
        429 => Ok(DeliveryOutcome::Retryable {
            retry_after: body
                .parameters
                .as_ref()
                .and_then(|p| p.retry_after)
                .map(Duration::from_secs),
            reason: description,
        }),
        403 => Ok(DeliveryOutcome::Rejected(description)),
        400 if is_unreachable_user(&description) => Ok(DeliveryOutcome::Rejected(description)),
        401 | 404 => Err(BotApiError::InvalidToken {
            status,
            description,
        }),
        400..=499 => Err(BotApiError::BadRequest {
            status,
            description,
        }),
        _ => Ok(DeliveryOutcome::Retryable {
            retry_after: None,
            reason: description,
        }),
    }
}

fn is_unreachable_user(description: &str) -> bool {
    let description = description.to_ascii_lowercase();
    ["chat not found", "user is deactivated", "bot was blocked"]
        .iter()
        .any(|needle| description.contains(needle))
}

/// Telegram Bot API client.
pub struct BotApiClient {
    http: reqwest::Client,
    send_url: String,
    limiter: RateLimiter,
    rate_limit: SharedRateLimit,
}

impl BotApiClient {
    /// Creates a client for `token` against `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        token: &str,
        min_send_interval: Duration,
        rate_limit: SharedRateLimit,
    ) -> Result<Self, BotApiError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            send_url: format!("{}/bot{token}/sendMessage", base_url.trim_end_matches('/')),
            limiter: RateLimiter::new(min_send_interval),
            rate_limit,
        })
    }
}

#[async_trait]
impl MessageSender for BotApiClient {
    async fn send_project(
        &self,
        user_id: UserId,
        project: &Project,
    ) -> Result<DeliveryOutcome, BotApiError> {
        {
            let state = self.rate_limit.read().await;
            let now = Utc::now();
            if state.is_exhausted(now) {
                return Ok(DeliveryOutcome::Retryable {
                    retry_after: state.time_until_reset(now),
                    reason: "bot API flood control still active".to_owned(),
                });
            }
        }

        self.limiter.wait_and_acquire().await;

        let text = project_message(project);
        let url = project.web_url();
        let request = SendMessage {
            chat_id: user_id,
            text: &text,
            parse_mode: "HTML",
            disable_web_page_preview: true,
            reply_markup: InlineKeyboard {
                inline_keyboard: [[UrlButton {
                    text: OPEN_PROJECT_LABEL,
                    url: &url,
                }]],
            },
        };

        debug!("Sending project {} to user {}", project.id, user_id);
        let response = match self.http.post(&self.send_url).json(&request).send().await {
            Ok(response) => response,
            Err(e) => {
                return Ok(DeliveryOutcome::Retryable {
                    retry_after: None,
                    reason: e.without_url().to_string(),
                });
            }
        };

        let status = response.status().as_u16();
        let headers = RateLimitHeaders::from_headers(response.headers(), Utc::now());
        if !headers.is_empty() {
            self.rate_limit.write().await.record(headers, Utc::now());
        }

        let body: BotResponse = response.json().await.unwrap_or_default();
        let outcome = classify_response(status, &body)?;

        if status == 429
            && let DeliveryOutcome::Retryable { retry_after, .. } = &outcome
        {
            warn!("Bot API flood control, retry after {:?}", retry_after);
            self.rate_limit
                .write()
                .await
                .record_throttled(*retry_after, Utc::now());
            if let Some(delay) = *retry_after {
                self.limiter.defer(delay).await;
            }
        }

        Ok(outcome)
    }
}

impl std::fmt::Debug for BotApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotApiClient")
            .field("min_send_interval", &self.limiter.min_interval())
            .finish_non_exhaustive()
    }
}
