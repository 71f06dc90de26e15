//! Marketplace project listings.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Marketplace identifier of a project.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(String);

impl ProjectId {
    /// Creates a project identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProjectId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Stated project budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Budget {
    pub amount: f64,
    pub currency: String,
}

impl fmt::Display for Budget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.amount.fract().abs() < f64::EPSILON {
            write!(f, "{:.0} {}", self.amount, self.currency)
        } else {
            write!(f, "{:.2} {}", self.amount, self.currency)
        }
    }
}

/// Employer who posted a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Employer {
    pub id: String,
    pub login: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl Employer {
    /// Human readable name, `First Last (@login)` with the missing parts dropped.
    #[must_use]
    pub fn display_name(&self) -> Option<String> {
        let name = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .filter(|part| !part.trim().is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        match (name.is_empty(), self.login.as_deref().filter(|l| !l.is_empty())) {
            (false, Some(login)) => Some(format!("{name} (@{login})")),
            (true, Some(login)) => Some(format!("@{login}")),
            (false, None) => Some(name),
            (true, None) => None,
        }
    }
}

/// One marketplace listing. Never mutated after it has been fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub title: String,
    pub description: String,
    pub category: Option<String>,
    /// `None` means the budget is negotiable.
    pub budget: Option<Budget>,
    /// Skill identifiers.
    pub skills: BTreeSet<String>,
    /// Skill display names, in marketplace order.
    #[serde(default)]
    pub skill_names: Vec<String>,
    pub posted_at: DateTime<Utc>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub employer: Option<Employer>,
    #[serde(default)]
    pub only_for_plus: bool,
    /// Whether the project still accepts proposals.
    #[serde(default = "default_open")]
    pub is_open: bool,
}

const fn default_open() -> bool {
    true
}

impl Project {
    /// Creates an open project with only the fields the filters look at.
    #[must_use]
    pub fn new(id: impl Into<String>, title: impl Into<String>, posted_at: DateTime<Utc>) -> Self {
        Self {
            id: ProjectId::new(id),
            title: title.into(),
            description: String::new(),
            category: None,
            budget: None,
            skills: BTreeSet::new(),
            skill_names: Vec::new(),
            posted_at,
            url: None,
            employer: None,
            only_for_plus: false,
            is_open: true,
        }
    }

    /// Sets the category.
    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Sets the budget.
    #[must_use]
    pub fn with_budget(mut self, amount: f64, currency: impl Into<String>) -> Self {
        self.budget = Some(Budget {
            amount,
            currency: currency.into(),
        });
        self
    }

    /// Adds skills by identifier.
    #[must_use]
    pub fn with_skills<I, S>(mut self, skills: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skills.extend(skills.into_iter().map(Into::into));
        self
    }

    /// Link to the project page.
    #[must_use]
    pub fn web_url(&self) -> String {
        self.url.clone().unwrap_or_else(|| {
            format!("https://freelancehunt.com/project/{}.html", self.id)
        })
    }
}
