//! Persistent state consumed by the monitor: seen markers and filter profiles.

mod profiles;
mod seen;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::{FilterProfile, ProjectId, UserId};

pub use profiles::JsonProfileStore;
pub use seen::{JsonSeenStore, SeenMarker};

/// Errors raised by the stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to access store file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode or decode store file: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Invalid profile data: {0}")]
    InvalidProfile(String),
}

/// Records which projects have already been processed.
#[async_trait]
pub trait SeenStore: Send + Sync {
    /// Whether the project has been marked before.
    async fn is_seen(&self, id: &ProjectId) -> Result<bool, StoreError>;

    /// Marks a project as seen.
    ///
    /// Idempotent: returns `true` only for the call that inserted the marker,
    /// so concurrent callers cannot both treat a project as new.
    async fn mark_seen(&self, id: &ProjectId, at: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Marks a whole batch; one flag per id, `true` where this call inserted
    /// the marker. A repeated id only counts as new the first time.
    async fn mark_all_seen(
        &self,
        ids: &[ProjectId],
        at: DateTime<Utc>,
    ) -> Result<Vec<bool>, StoreError> {
        let mut fresh = Vec::with_capacity(ids.len());
        for id in ids {
            fresh.push(self.mark_seen(id, at).await?);
        }
        Ok(fresh)
    }

    /// Drops markers first seen before `older_than`; returns how many.
    async fn prune(&self, older_than: DateTime<Utc>) -> Result<usize, StoreError>;

    /// Number of stored markers.
    async fn len(&self) -> usize;

    /// Whether no marker is stored.
    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Read access to subscriber profiles plus the one write the core performs.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// All profiles with `active = true`.
    async fn active_profiles(&self) -> Result<Vec<FilterProfile>, StoreError>;

    /// Looks up a single profile.
    async fn get(&self, user_id: UserId) -> Result<Option<FilterProfile>, StoreError>;

    /// Sets `active = false`; returns whether anything changed.
    async fn deactivate(&self, user_id: UserId) -> Result<bool, StoreError>;
}
