//! Matching of projects against user filter profiles.
//!
//! Everything here is pure: no I/O, no shared state.

use std::fmt;

use crate::model::{FilterProfile, Project};

/// First check a project failed against a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mismatch {
    Inactive,
    Category,
    Budget,
    MissingSkill,
    ExcludedSkill,
    Employer,
    PlusOnly,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::Inactive => "profile inactive",
            Self::Category => "category not subscribed",
            Self::Budget => "budget out of range",
            Self::MissingSkill => "required skill missing",
            Self::ExcludedSkill => "excluded skill present",
            Self::Employer => "different employer",
            Self::PlusOnly => "not a Plus-only project",
        };
        f.write_str(reason)
    }
}

/// Returns true if `project` satisfies every criterion of `profile`.
#[must_use]
pub fn matches(project: &Project, profile: &FilterProfile) -> bool {
    check(project, profile).is_ok()
}

/// Evaluates the profile and reports the first failing criterion.
///
/// An inactive profile fails immediately without looking at the project.
pub fn check(project: &Project, profile: &FilterProfile) -> Result<(), Mismatch> {
    if !profile.active {
        return Err(Mismatch::Inactive);
    }
    if !category_matches(project, profile) {
        return Err(Mismatch::Category);
    }
    if !budget_matches(project, profile) {
        return Err(Mismatch::Budget);
    }
    if !profile.required_skills.is_subset(&project.skills) {
        return Err(Mismatch::MissingSkill);
    }
    if !profile.excluded_skills.is_disjoint(&project.skills) {
        return Err(Mismatch::ExcludedSkill);
    }
    listing_matches(project, profile)
}

fn category_matches(project: &Project, profile: &FilterProfile) -> bool {
    profile.categories.is_empty()
        || project
            .category
            .as_ref()
            .is_some_and(|category| profile.categories.contains(category))
}

/// A project without a stated budget always passes.
fn budget_matches(project: &Project, profile: &FilterProfile) -> bool {
    let Some(ref budget) = project.budget else {
        return true;
    };

    let above_min = profile.min_budget.is_none_or(|min| min <= budget.amount);
    let below_max = profile.max_budget.is_none_or(|max| budget.amount <= max);
    above_min && below_max
}

fn listing_matches(project: &Project, profile: &FilterProfile) -> Result<(), Mismatch> {
    if let Some(ref wanted) = profile.employer_id {
        let employer = project.employer.as_ref().map(|e| e.id.as_str());
        if employer != Some(wanted.as_str()) {
            return Err(Mismatch::Employer);
        }
    }
    if profile.only_for_plus && !project.only_for_plus {
        return Err(Mismatch::PlusOnly);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::model::Employer;

    fn design_project() -> Project {
        Project::new("p1", "Logo for a bakery", Utc::now())
            .with_category("design")
            .with_budget(500.0, "UAH")
            .with_skills(["logo"])
    }

    fn design_profile() -> FilterProfile {
        FilterProfile::new(1)
            .with_categories(["design"])
            .with_budget(Some(100.0), Some(1000.0))
            .with_required_skills(["logo"])
    }

    #[test]
    fn test_matching_profile() {
        assert!(matches(&design_project(), &design_profile()));
    }

    #[test]
    fn test_budget_above_max() {
        let profile = design_profile().with_budget(Some(100.0), Some(100.0));
        assert_eq!(check(&design_project(), &profile), Err(Mismatch::Budget));
    }

    #[test]
    fn test_budget_bounds_inclusive() {
        let project = design_project();
        let at_min = design_profile().with_budget(Some(500.0), None);
        let at_max = design_profile().with_budget(None, Some(500.0));
        assert!(matches(&project, &at_min));
        assert!(matches(&project, &at_max));
    }

    #[test]
    fn test_inactive_profile_never_matches() {
        let mut profile = FilterProfile::new(1);
        profile.active = false;
        assert_eq!(check(&design_project(), &profile), Err(Mismatch::Inactive));
    }

    #[test]
    fn test_empty_categories_accept_any_category() {
        let profile = FilterProfile::new(1);
        for category in ["design", "development", "writing"] {
            let project = Project::new("x", "t", Utc::now()).with_category(category);
            assert!(matches(&project, &profile));
        }
        let uncategorized = Project::new("y", "t", Utc::now());
        assert!(matches(&uncategorized, &profile));
    }

    #[test]
    fn test_category_outside_subscription() {
        let project = design_project();
        let profile = FilterProfile::new(1).with_categories(["development"]);
        assert_eq!(check(&project, &profile), Err(Mismatch::Category));
    }

    #[test]
    fn test_uncategorized_project_fails_category_restriction() {
        let project = Project::new("p2", "t", Utc::now());
        let profile = FilterProfile::new(1).with_categories(["design"]);
        assert!(!matches(&project, &profile));
    }

    #[test]
    fn test_negotiable_budget_ignores_bounds() {
        let project = Project::new("p3", "t", Utc::now()).with_skills(["logo"]);
        let bounds = [
            (None, None),
            (Some(0.0), Some(1.0)),
            (Some(10_000.0), None),
            (None, Some(0.0)),
        ];
        for (min, max) in bounds {
            let profile = FilterProfile::new(1).with_budget(min, max);
            assert!(matches(&project, &profile));
        }
    }

    #[test]
    fn test_empty_categories_depend_only_on_budget_and_skills() {
        let profile = FilterProfile::new(1)
            .with_budget(Some(100.0), Some(1000.0))
            .with_required_skills(["logo"]);
        let base = design_project();

        let mut other_category = base.clone();
        other_category.category = Some("writing".to_owned());
        assert_eq!(matches(&base, &profile), matches(&other_category, &profile));

        let expensive = base.clone().with_budget(5000.0, "UAH");
        assert!(!matches(&expensive, &profile));
    }

    #[test]
    fn test_required_skills_subset() {
        let project = design_project().with_skills(["branding"]);
        let profile = FilterProfile::new(1).with_required_skills(["logo", "branding"]);
        assert!(matches(&project, &profile));

        let missing = FilterProfile::new(1).with_required_skills(["logo", "illustration"]);
        assert_eq!(check(&project, &missing), Err(Mismatch::MissingSkill));
    }

    #[test]
    fn test_excluded_skill_blocks() {
        let profile = FilterProfile::new(1).with_excluded_skills(["logo"]);
        assert_eq!(
            check(&design_project(), &profile),
            Err(Mismatch::ExcludedSkill)
        );
    }

    #[test]
    fn test_employer_and_plus_filters() {
        let mut project = design_project();
        project.employer = Some(Employer {
            id: "77".to_owned(),
            ..Employer::default()
        });

        let mut profile = FilterProfile::new(1);
        profile.employer_id = Some("77".to_owned());
        assert!(matches(&project, &profile));

        profile.employer_id = Some("78".to_owned());
        assert_eq!(check(&project, &profile), Err(Mismatch::Employer));

        let mut plus = FilterProfile::new(1);
        plus.only_for_plus = true;
        assert_eq!(check(&project, &plus), Err(Mismatch::PlusOnly));
        project.only_for_plus = true;
        assert!(matches(&project, &plus));
    }
}
