//! Domain types shared by every stage of the monitoring pipeline.

mod profile;
mod project;

pub use profile::{FilterProfile, ProfileError, UserId};
pub use project::{Budget, Employer, Project, ProjectId};
