//! Deterministic names derived from a project id.
//!
//! Every generated identifier starts from the slug: the project id lowercased
//! with everything but ASCII letters and digits removed.

use crate::error::RuntimeError;

/// Compose project names are prefixed so operators can tell them apart.
pub const COMPOSE_PREFIX: &str = "labdock";

/// Longest user name the database engine accepts.
pub const MAX_DB_USER_LEN: usize = 32;

/// Longest database name the database engine accepts.
pub const MAX_DB_NAME_LEN: usize = 64;

pub fn slugify(project_id: &str) -> String {
    project_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectNames {
    pub slug: String,
    pub compose_project: String,
    pub network: String,
    pub volume: String,
    pub database: String,
    pub db_user: String,
}

impl ProjectNames {
    pub fn derive(project_id: &str) -> Result<Self, RuntimeError> {
        let slug = slugify(project_id);
        if slug.is_empty() {
            return Err(RuntimeError::Configuration(format!(
                "Project id '{}' has no alphanumeric characters to derive names from",
                project_id
            )));
        }

        Ok(Self {
            compose_project: format!("{}-{}", COMPOSE_PREFIX, slug),
            network: format!("{}-net", slug),
            volume: format!("{}-dbdata", slug),
            database: truncate(format!("db_{}", slug), MAX_DB_NAME_LEN),
            db_user: truncate(format!("u_{}", slug), MAX_DB_USER_LEN),
            slug,
        })
    }

    /// Container name for a service key (`app`, `web`, `db`, `admin`).
    pub fn container(&self, service: &str) -> String {
        format!("{}-{}", self.slug, service)
    }

    /// Prefix shared by every container of this project.
    pub fn container_prefix(&self) -> String {
        format!("{}-", self.slug)
    }

    pub fn host(&self, base_domain: &str) -> String {
        format!("{}.{}", self.slug, base_domain)
    }

    pub fn admin_host(&self, base_domain: &str) -> String {
        format!("{}-admin.{}", self.slug, base_domain)
    }

    /// Router and load-balancer name for a routed service.
    pub fn router(&self, service: &str) -> String {
        format!("{}-{}", self.slug, service)
    }
}

fn truncate(mut value: String, max: usize) -> String {
    // ASCII only, so byte truncation is a char boundary
    value.truncate(max);
    value
}
