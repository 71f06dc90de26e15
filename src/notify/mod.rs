//! Notification delivery through the Telegram Bot API.
//!
//! [`Dispatcher`] consumes [`NotificationRecord`](crate::scheduler::NotificationRecord)s
//! from the monitor and delivers them through a [`MessageSender`], retrying
//! retryable failures and deactivating users who blocked the bot.

mod bot;
mod dispatcher;
pub mod format;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::ErrorKind;
use crate::model::{Project, UserId};

pub use bot::{BotApiClient, BotApiError, BotResponse, classify_response};
pub use dispatcher::{Dispatcher, DispatcherConfig};

/// Public Bot API endpoint.
pub const DEFAULT_BOT_API_URL: &str = "https://api.telegram.org";

/// Result of one delivery attempt, or of a whole delivery once retries ran out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// Worth another attempt, after at least `retry_after` if given.
    Retryable {
        retry_after: Option<Duration>,
        reason: String,
    },
    /// The user cannot be reached anymore.
    Rejected(String),
}

impl DeliveryOutcome {
    /// Failure kind, or `None` when delivered.
    #[must_use]
    pub const fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Delivered => None,
            Self::Retryable {
                retry_after: Some(_),
                ..
            } => Some(ErrorKind::Throttled),
            Self::Retryable { .. } => Some(ErrorKind::Transient),
            Self::Rejected(_) => Some(ErrorKind::UserUnreachable),
        }
    }
}

/// Sends one project notification to one user.
#[async_trait]
pub trait MessageSender: Send + Sync {
    /// Makes a single delivery attempt.
    ///
    /// # Errors
    ///
    /// Returns an error when the message can never be delivered as sent;
    /// [`BotApiError::is_fatal`] tells whether any further send would fail too.
    async fn send_project(
        &self,
        user_id: UserId,
        project: &Project,
    ) -> Result<DeliveryOutcome, BotApiError>;
}
