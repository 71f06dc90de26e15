//! Freelancehunt API payloads and their conversion into domain types.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::model::{Budget, Employer, Project, ProjectId};

/// Status id of projects that accept proposals.
pub const STATUS_OPEN_FOR_PROPOSALS: u32 = 11;

/// `GET /projects` response envelope.
#[derive(Debug, Deserialize)]
pub struct ProjectList {
    #[serde(default)]
    pub data: Vec<ProjectResource>,

    #[serde(default)]
    pub links: ListLinks,

    #[serde(default)]
    pub meta: Option<Meta>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListLinks {
    #[serde(default)]
    pub next: Option<String>,
}

/// Some deployments report quota in the body instead of headers.
#[derive(Debug, Default, Deserialize)]
pub struct Meta {
    #[serde(default, alias = "rate_limit")]
    pub ratelimit: Option<BodyRateLimit>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BodyRateLimit {
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
}

/// One project as the API returns it.
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectResource {
    pub id: u64,
    pub attributes: ProjectAttributes,
    #[serde(default)]
    pub links: Option<ResourceLinks>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProjectAttributes {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub description_html: Option<String>,
    #[serde(default)]
    pub skills: Vec<Skill>,
    #[serde(default)]
    pub status: Option<Status>,
    #[serde(default)]
    pub budget: Option<WireBudget>,
    pub published_at: DateTime<Utc>,
    #[serde(default)]
    pub employer: Option<WireEmployer>,
    #[serde(default, alias = "only_for_plus")]
    pub is_only_for_plus: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Skill {
    pub id: u64,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Status {
    pub id: u32,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireBudget {
    pub amount: Option<f64>,
    #[serde(default)]
    pub currency: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireEmployer {
    pub id: u64,
    #[serde(default)]
    pub login: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResourceLinks {
    #[serde(rename = "self", default)]
    pub self_link: Option<SelfLink>,
}

/// `links.self` is either `{ "web": ..., "api": ... }` or a bare URL.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SelfLink {
    Urls {
        #[serde(default)]
        web: Option<String>,
    },
    Plain(String),
}

impl From<ProjectResource> for Project {
    fn from(resource: ProjectResource) -> Self {
        let attributes = resource.attributes;

        let description = attributes
            .description_html
            .or(attributes.description)
            .unwrap_or_default();

        let url = resource
            .links
            .and_then(|links| links.self_link)
            .and_then(|link| match link {
                SelfLink::Urls { web } => web,
                SelfLink::Plain(url) => Some(url),
            });

        let budget = attributes.budget.and_then(|b| {
            b.amount.map(|amount| Budget {
                amount,
                currency: b.currency,
            })
        });

        let skills: BTreeSet<String> = attributes.skills.iter().map(|s| s.id.to_string()).collect();

        Self {
            id: ProjectId::new(resource.id.to_string()),
            title: attributes.name,
            description,
            // The marketplace has no categories; the primary skill plays that role.
            category: attributes.skills.first().map(|s| s.id.to_string()),
            budget,
            skills,
            skill_names: attributes.skills.into_iter().map(|s| s.name).collect(),
            posted_at: attributes.published_at,
            url,
            employer: attributes.employer.map(|e| Employer {
                id: e.id.to_string(),
                login: e.login,
                first_name: e.first_name,
                last_name: e.last_name,
            }),
            only_for_plus: attributes.is_only_for_plus,
            is_open: attributes
                .status
                .is_none_or(|s| s.id == STATUS_OPEN_FOR_PROPOSALS),
        }
    }
}
