//! Per-user subscription criteria.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Telegram chat identifier of a subscriber.
pub type UserId = i64;

/// Errors found while validating a filter profile.
#[derive(Debug, Error, PartialEq)]
pub enum ProfileError {
    #[error("Profile of user {user_id} has min budget {min} above max budget {max}")]
    BudgetBoundsInverted { user_id: UserId, min: f64, max: f64 },

    #[error("Profile of user {user_id} has an invalid budget bound: {value}")]
    InvalidBudget { user_id: UserId, value: f64 },

    #[error("Profile of user {user_id} both requires and excludes skill {skill}")]
    ConflictingSkill { user_id: UserId, skill: String },

    #[error("Duplicate profile for user {user_id}")]
    DuplicateUser { user_id: UserId },
}

/// One user's subscription criteria.
///
/// An empty category set places no restriction on categories. Unset budget
/// bounds are open-ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterProfile {
    pub user_id: UserId,

    #[serde(default)]
    pub categories: BTreeSet<String>,

    #[serde(default)]
    pub min_budget: Option<f64>,

    #[serde(default)]
    pub max_budget: Option<f64>,

    #[serde(default)]
    pub required_skills: BTreeSet<String>,

    #[serde(default)]
    pub excluded_skills: BTreeSet<String>,

    /// Only notify about projects from this employer.
    #[serde(default)]
    pub employer_id: Option<String>,

    /// Only notify about projects reserved for Plus accounts.
    #[serde(default)]
    pub only_for_plus: bool,

    #[serde(default = "default_active")]
    pub active: bool,
}

const fn default_active() -> bool {
    true
}

impl FilterProfile {
    /// Creates an active profile without any restriction.
    #[must_use]
    pub const fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            categories: BTreeSet::new(),
            min_budget: None,
            max_budget: None,
            required_skills: BTreeSet::new(),
            excluded_skills: BTreeSet::new(),
            employer_id: None,
            only_for_plus: false,
            active: true,
        }
    }

    /// Restricts the profile to the given categories.
    #[must_use]
    pub fn with_categories<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.categories.extend(categories.into_iter().map(Into::into));
        self
    }

    /// Sets the budget bounds.
    #[must_use]
    pub const fn with_budget(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min_budget = min;
        self.max_budget = max;
        self
    }

    /// Adds required skills.
    #[must_use]
    pub fn with_required_skills<I, S>(mut self, skills: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_skills.extend(skills.into_iter().map(Into::into));
        self
    }

    /// Adds excluded skills.
    #[must_use]
    pub fn with_excluded_skills<I, S>(mut self, skills: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded_skills.extend(skills.into_iter().map(Into::into));
        self
    }

    /// Checks the profile invariants.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant.
    pub fn validate(&self) -> Result<(), ProfileError> {
        for value in [self.min_budget, self.max_budget].into_iter().flatten() {
            if !value.is_finite() || value < 0.0 {
                return Err(ProfileError::InvalidBudget {
                    user_id: self.user_id,
                    value,
                });
            }
        }

        if let (Some(min), Some(max)) = (self.min_budget, self.max_budget)
            && min > max
        {
            return Err(ProfileError::BudgetBoundsInverted {
                user_id: self.user_id,
                min,
                max,
            });
        }

        if let Some(skill) = self.required_skills.intersection(&self.excluded_skills).next() {
            return Err(ProfileError::ConflictingSkill {
                user_id: self.user_id,
                skill: skill.clone(),
            });
        }

        Ok(())
    }

    /// Short human readable summary, used in logs.
    #[must_use]
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();

        if !self.categories.is_empty() {
            parts.push(format!("categories [{}]", join(&self.categories)));
        }
        match (self.min_budget, self.max_budget) {
            (Some(min), Some(max)) => parts.push(format!("budget {min}..{max}")),
            (Some(min), None) => parts.push(format!("budget >= {min}")),
            (None, Some(max)) => parts.push(format!("budget <= {max}")),
            (None, None) => {}
        }
        if !self.required_skills.is_empty() {
            parts.push(format!("skills [{}]", join(&self.required_skills)));
        }
        if !self.excluded_skills.is_empty() {
            parts.push(format!("without [{}]", join(&self.excluded_skills)));
        }
        if let Some(ref employer) = self.employer_id {
            parts.push(format!("employer #{employer}"));
        }
        if self.only_for_plus {
            parts.push("Plus only".to_owned());
        }

        if parts.is_empty() {
            "no filters (all projects)".to_owned()
        } else {
            parts.join(", ")
        }
    }
}

fn join(set: &BTreeSet<String>) -> String {
    set.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
}
