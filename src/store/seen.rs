//! JSON-backed seen-project store.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{SeenStore, StoreError};
use crate::model::ProjectId;

/// One processed project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeenMarker {
    pub project_id: ProjectId,
    pub first_seen: DateTime<Utc>,
}

/// Seen markers held in memory and, when a path is set, mirrored to a JSON
/// file after every change. A batch is written once.
///
/// Reads share the lock; inserts take it exclusively, which makes
/// `mark_seen` an atomic check-and-insert.
#[derive(Debug)]
pub struct JsonSeenStore {
    markers: RwLock<HashMap<ProjectId, DateTime<Utc>>>,
    path: Option<PathBuf>,
}

impl JsonSeenStore {
    /// Creates a store that never touches the disk.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            markers: RwLock::new(HashMap::new()),
            path: None,
        }
    }

    /// Opens the store at `path`, loading existing markers if the file exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        let markers = match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let list: Vec<SeenMarker> = serde_json::from_str(&content)?;
                list.into_iter()
                    .map(|m| (m.project_id, m.first_seen))
                    .collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };

        info!(
            "Loaded {} seen projects from {}",
            markers.len(),
            path.display()
        );

        Ok(Self {
            markers: RwLock::new(markers),
            path: Some(path),
        })
    }

    /// Returns all markers, oldest first.
    pub async fn markers(&self) -> Vec<SeenMarker> {
        let markers = self.markers.read().await;
        sorted_markers(&markers)
    }

    async fn persist(&self, markers: &HashMap<ProjectId, DateTime<Utc>>) -> Result<(), StoreError> {
        let Some(ref path) = self.path else {
            return Ok(());
        };

        let json = serde_json::to_string(&sorted_markers(markers))?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

fn sorted_markers(markers: &HashMap<ProjectId, DateTime<Utc>>) -> Vec<SeenMarker> {
    let mut list: Vec<SeenMarker> = markers
        .iter()
        .map(|(id, first_seen)| SeenMarker {
            project_id: id.clone(),
            first_seen: *first_seen,
        })
        .collect();
    list.sort_by(|a, b| {
        a.first_seen
            .cmp(&b.first_seen)
            .then_with(|| a.project_id.cmp(&b.project_id))
    });
    list
}

#[async_trait]
impl SeenStore for JsonSeenStore {
    async fn is_seen(&self, id: &ProjectId) -> Result<bool, StoreError> {
        Ok(self.markers.read().await.contains_key(id))
    }

    async fn mark_seen(&self, id: &ProjectId, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut markers = self.markers.write().await;
        if markers.contains_key(id) {
            return Ok(false);
        }

        markers.insert(id.clone(), at);
        // Still under the write lock: the marker is on disk before anyone
        // can observe it as new.
        if let Err(e) = self.persist(&markers).await {
            markers.remove(id);
            return Err(e);
        }
        Ok(true)
    }

    async fn mark_all_seen(
        &self,
        ids: &[ProjectId],
        at: DateTime<Utc>,
    ) -> Result<Vec<bool>, StoreError> {
        let mut markers = self.markers.write().await;
        let fresh: Vec<bool> = ids
            .iter()
            .map(|id| {
                if markers.contains_key(id) {
                    false
                } else {
                    markers.insert(id.clone(), at);
                    true
                }
            })
            .collect();

        if fresh.contains(&true)
            && let Err(e) = self.persist(&markers).await
        {
            for (id, inserted) in ids.iter().zip(&fresh) {
                if *inserted {
                    markers.remove(id);
                }
            }
            return Err(e);
        }
        Ok(fresh)
    }

    async fn prune(&self, older_than: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut markers = self.markers.write().await;
        let before = markers.len();
        markers.retain(|_, first_seen| *first_seen >= older_than);
        let removed = before - markers.len();

        if removed > 0 {
            self.persist(&markers).await?;
            debug!("Pruned {} seen projects older than {}", removed, older_than);
        }
        Ok(removed)
    }

    async fn len(&self) -> usize {
        self.markers.read().await.len()
    }
}
