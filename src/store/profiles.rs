//! Profile store backed by the profile JSON file.
//!
//! The file is shared with whatever manages subscriptions, so it is re-read
//! before every lookup and before every write.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::{RwLock, RwLockReadGuard};
use tracing::{debug, info, warn};

use super::{ProfileStore, StoreError};
use crate::config::{ProfileBook, ProfileBookError};
use crate::model::{FilterProfile, UserId};

/// Keeps the last valid [`ProfileBook`] and writes it back on deactivation.
#[derive(Debug)]
pub struct JsonProfileStore {
    book: RwLock<ProfileBook>,
    path: Option<PathBuf>,
}

impl JsonProfileStore {
    /// Wraps an already loaded book; changes stay in memory.
    #[must_use]
    pub fn in_memory(book: ProfileBook) -> Self {
        Self {
            book: RwLock::new(book),
            path: None,
        }
    }

    /// Loads and validates the book at `path`; a missing file is an empty book.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be parsed or a profile is invalid.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let book = ProfileBook::load_or_default(&path).map_err(store_error)?;
        book.validate().map_err(store_error)?;

        info!(
            "Loaded {} profiles ({} active) from {}",
            book.len(),
            book.active().count(),
            path.display()
        );

        Ok(Self {
            book: RwLock::new(book),
            path: Some(path),
        })
    }

    /// Returns a copy of every profile, active or not.
    pub async fn snapshot(&self) -> ProfileBook {
        self.book.read().await.clone()
    }

    /// Replaces `book` with the file's current content.
    ///
    /// A file that does not parse or validate is skipped with a warning and
    /// the last valid book stays in use.
    async fn reload(&self, book: &mut ProfileBook) -> Result<(), StoreError> {
        let Some(ref path) = self.path else {
            return Ok(());
        };

        match read_book(path).await {
            Ok(fresh) => {
                if fresh.len() != book.len() {
                    debug!("Profile file now holds {} profiles", fresh.len());
                }
                *book = fresh;
                Ok(())
            }
            Err(StoreError::Io(e)) => Err(StoreError::Io(e)),
            Err(e) => {
                warn!(
                    "Ignoring unusable profile file {}, keeping last valid profiles: {}",
                    path.display(),
                    e
                );
                Ok(())
            }
        }
    }

    async fn current(&self) -> Result<RwLockReadGuard<'_, ProfileBook>, StoreError> {
        if self.path.is_some() {
            let mut book = self.book.write().await;
            self.reload(&mut book).await?;
        }
        Ok(self.book.read().await)
    }
}

async fn read_book(path: &Path) -> Result<ProfileBook, StoreError> {
    let book = match tokio::fs::read_to_string(path).await {
        Ok(content) => serde_json::from_str::<ProfileBook>(&content)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => ProfileBook::default(),
        Err(e) => return Err(e.into()),
    };
    book.validate().map_err(store_error)?;
    Ok(book)
}

/// Writes through a temporary file so readers never see a partial book.
async fn write_book(path: &Path, book: &ProfileBook) -> Result<(), StoreError> {
    let json = serde_json::to_string_pretty(book)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

fn store_error(e: ProfileBookError) -> StoreError {
    match e {
        ProfileBookError::IoError(e) => StoreError::Io(e),
        ProfileBookError::ParseError(e) => StoreError::Serde(e),
        ProfileBookError::Invalid(e) => StoreError::InvalidProfile(e.to_string()),
    }
}

#[async_trait]
impl ProfileStore for JsonProfileStore {
    async fn active_profiles(&self) -> Result<Vec<FilterProfile>, StoreError> {
        Ok(self.current().await?.active().cloned().collect())
    }

    async fn get(&self, user_id: UserId) -> Result<Option<FilterProfile>, StoreError> {
        Ok(self.current().await?.get(user_id).cloned())
    }

    async fn deactivate(&self, user_id: UserId) -> Result<bool, StoreError> {
        let mut book = self.book.write().await;
        self.reload(&mut book).await?;

        let Some(profile) = book.get_mut(user_id) else {
            return Ok(false);
        };
        if !profile.active {
            return Ok(false);
        }
        profile.active = false;

        if let Some(ref path) = self.path {
            write_book(path, &book).await?;
        }

        info!("Deactivated profile of user {}", user_id);
        Ok(true)
    }
}
