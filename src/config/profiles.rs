//! Filter profile file and its validation.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{FilterProfile, ProfileError, UserId};

/// Errors that can occur while loading or validating the profile file.
#[derive(Debug, Error)]
pub enum ProfileBookError {
    #[error(transparent)]
    Invalid(#[from] ProfileError),

    #[error("Failed to read profile file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse profile file: {0}")]
    ParseError(#[from] serde_json::Error),
}

/// All subscriber profiles, keyed by user id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileBook {
    #[serde(default)]
    pub profiles: Vec<FilterProfile>,
}

impl ProfileBook {
    /// Loads profiles from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ProfileBookError> {
        let content = std::fs::read_to_string(path)?;
        let book: Self = serde_json::from_str(&content)?;
        Ok(book)
    }

    /// Loads profiles, treating a missing file as an empty book.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ProfileBookError> {
        match Self::load_from_file(path) {
            Err(ProfileBookError::IoError(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// Saves profiles to a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ProfileBookError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validates every profile.
    ///
    /// # Errors
    ///
    /// Returns the first validation error encountered.
    pub fn validate(&self) -> Result<(), ProfileBookError> {
        self.validate_all()
            .into_iter()
            .find_map(Result::err)
            .map_or(Ok(()), |e| Err(e.into()))
    }

    /// Returns one validation result per profile, in file order.
    #[must_use]
    pub fn validate_all(&self) -> Vec<Result<(), ProfileError>> {
        let mut seen_users = HashSet::new();

        self.profiles
            .iter()
            .map(|profile| {
                if !seen_users.insert(profile.user_id) {
                    return Err(ProfileError::DuplicateUser {
                        user_id: profile.user_id,
                    });
                }
                profile.validate()
            })
            .collect()
    }

    /// Gets a profile by user id.
    #[must_use]
    pub fn get(&self, user_id: UserId) -> Option<&FilterProfile> {
        self.profiles.iter().find(|p| p.user_id == user_id)
    }

    /// Gets a mutable profile by user id.
    pub fn get_mut(&mut self, user_id: UserId) -> Option<&mut FilterProfile> {
        self.profiles.iter_mut().find(|p| p.user_id == user_id)
    }

    /// Iterates over active profiles.
    pub fn active(&self) -> impl Iterator<Item = &FilterProfile> {
        self.profiles.iter().filter(|p| p.active)
    }

    /// Returns the number of profiles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    /// Checks if there are no profiles.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Creates an example book for users to reference.
    #[must_use]
    pub fn example() -> Self {
        let mut plus_only = FilterProfile::new(333_333_333);
        plus_only.only_for_plus = true;
        plus_only.employer_id = Some("12345".to_owned());

        Self {
            profiles: vec![
                // No filters: every new project.
                FilterProfile::new(111_111_111),
                // Web development projects between 1000 and 20000, no WordPress.
                FilterProfile::new(222_222_222)
                    .with_categories(["99", "124"])
                    .with_budget(Some(1000.0), Some(20_000.0))
                    .with_required_skills(["99"])
                    .with_excluded_skills(["96"]),
                plus_only,
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_is_valid() {
        let book = ProfileBook::example();
        assert_eq!(book.len(), 3);
        assert!(book.validate().is_ok());
        assert!(book.validate_all().iter().all(Result::is_ok));
    }

    #[test]
    fn test_empty_book_is_valid() {
        let book = ProfileBook::default();
        assert!(book.is_empty());
        assert!(book.validate().is_ok());
    }

    #[test]
    fn test_duplicate_user_rejected() {
        let book = ProfileBook {
            profiles: vec![FilterProfile::new(1), FilterProfile::new(1)],
        };
        assert!(matches!(
            book.validate(),
            Err(ProfileBookError::Invalid(ProfileError::DuplicateUser { user_id: 1 }))
        ));
    }

    #[test]
    fn test_validate_all_reports_each_profile() {
        let book = ProfileBook {
            profiles: vec![
                FilterProfile::new(1),
                FilterProfile::new(2).with_budget(Some(10.0), Some(1.0)),
                FilterProfile::new(3),
            ],
        };
        let results = book.validate_all();
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        assert!(results[2].is_ok());
    }

    #[test]
    fn test_active_filters_inactive() {
        let mut book = ProfileBook::example();
        if let Some(profile) = book.get_mut(111_111_111) {
            profile.active = false;
        }
        assert_eq!(book.active().count(), 2);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profiles.json");

        ProfileBook::example().save_to_file(&path).unwrap();
        let loaded = ProfileBook::load_from_file(&path).unwrap();
        assert_eq!(loaded.profiles, ProfileBook::example().profiles);
    }

    #[test]
    fn test_missing_file_is_empty_book() {
        let dir = tempfile::tempdir().unwrap();
        let book = ProfileBook::load_or_default(dir.path().join("absent.json")).unwrap();
        assert!(book.is_empty());
    }
}
