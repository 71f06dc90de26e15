//! Ingestion adapters feeding the monitor.
//!
//! Polling (the marketplace client) and push (the webhook receiver) both
//! implement [`ProjectSource`], so the scheduler does not care which one is
//! wired in.

mod webhook;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::Project;

pub use webhook::{SECRET_HEADER, WebhookSource, WebhookState, router};

/// Position marker bounding a fetch to listings not yet fetched.
///
/// Sources treat it as opaque; the marketplace client stores the newest
/// publication time it has returned.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
}

impl Cursor {
    /// Cursor that fetches from the beginning.
    #[must_use]
    pub const fn start() -> Self {
        Self { since: None }
    }

    /// Cursor positioned at `since`.
    #[must_use]
    pub const fn at(since: DateTime<Utc>) -> Self {
        Self { since: Some(since) }
    }

    /// Moves the cursor forward to the newest of `projects`, never backwards.
    #[must_use]
    pub fn advanced_past(&self, projects: &[Project]) -> Self {
        let newest = projects.iter().map(|p| p.posted_at).max();
        Self {
            since: match (self.since, newest) {
                (Some(current), Some(newest)) => Some(current.max(newest)),
                (current, newest) => current.or(newest),
            },
        }
    }
}

/// Listings returned by a successful fetch.
#[derive(Debug, Clone, Default)]
pub struct FetchBatch {
    /// Listings in publication order, oldest first.
    pub projects: Vec<Project>,
    pub next_cursor: Cursor,
}

/// Result of one fetch, already classified for the scheduler.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Fetched(FetchBatch),
    /// Quota exhausted; retry the same cursor after backing off.
    Throttled { retry_after: Option<Duration> },
    /// Temporary failure; retry the same cursor after backing off.
    Transient { reason: String },
    /// Polling cannot continue without operator intervention.
    Fatal { reason: String },
}

/// A source of new marketplace listings.
#[async_trait]
pub trait ProjectSource: Send + Sync {
    /// Fetches listings not covered by `cursor`.
    ///
    /// Never fails hard: every failure is classified into a
    /// [`FetchOutcome`] variant.
    async fn fetch_new_projects(&self, cursor: &Cursor) -> FetchOutcome;

    /// Short name used in logs.
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;

    #[test]
    fn test_cursor_advances_to_newest() {
        let t0 = Utc::now();
        let projects = vec![
            Project::new("1", "a", t0),
            Project::new("2", "b", t0 + TimeDelta::seconds(10)),
        ];

        let cursor = Cursor::start().advanced_past(&projects);
        assert_eq!(cursor.since, Some(t0 + TimeDelta::seconds(10)));
    }

    #[test]
    fn test_cursor_never_moves_backwards() {
        let t0 = Utc::now();
        let cursor = Cursor::at(t0);
        let older = vec![Project::new("1", "a", t0 - TimeDelta::hours(1))];
        assert_eq!(cursor.advanced_past(&older), cursor);
        assert_eq!(cursor.advanced_past(&[]), cursor);
    }
}
