//! Project and lab records as seen by the runtime core.
//!
//! The surrounding system owns these records; the core reads them and writes
//! back only the deployment columns. Every status write goes through a
//! [`DeploymentState`] so that `url` is set exactly when the project is
//! running and `error_message` exactly when it is in error.

mod store;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::db::DatabaseError;

pub use store::ProjectStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    Stopped,
    Starting,
    Running,
    Error,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Stopped => "stopped",
            ProjectStatus::Starting => "starting",
            ProjectStatus::Running => "running",
            ProjectStatus::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Result<Self, DatabaseError> {
        match value {
            "stopped" => Ok(ProjectStatus::Stopped),
            "starting" => Ok(ProjectStatus::Starting),
            "running" => Ok(ProjectStatus::Running),
            "error" => Ok(ProjectStatus::Error),
            other => Err(DatabaseError::InvalidValue {
                column: "status",
                value: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadType {
    Static,
    Application,
}

impl WorkloadType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadType::Static => "static",
            WorkloadType::Application => "application",
        }
    }

    pub fn parse(value: &str) -> Result<Self, DatabaseError> {
        match value {
            "static" => Ok(WorkloadType::Static),
            "application" => Ok(WorkloadType::Application),
            other => Err(DatabaseError::InvalidValue {
                column: "workload_type",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Project {
    pub id: String,
    pub owner_id: String,
    pub lab_id: Option<String>,
    /// Opaque object-store key of the submitted archive.
    pub archive_ref: Option<String>,
    pub workload_type: Option<WorkloadType>,
    pub status: ProjectStatus,
    pub url: Option<String>,
    pub admin_url: Option<String>,
    pub error_message: Option<String>,
    pub last_active_at: Option<DateTime<Utc>>,
    /// Total extracted size in bytes, recorded once by the viewer.
    pub total_size: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    /// Returns the archive reference when one has been uploaded.
    pub fn archive(&self) -> Option<&str> {
        self.archive_ref
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
    }

    pub fn is_owned_by(&self, owner_id: &str) -> bool {
        self.owner_id == owner_id
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Lab {
    pub id: String,
    pub name: String,
    pub section: Option<String>,
    pub deadline: Option<DateTime<Utc>>,
}

/// The deployment columns of a project, written as one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentState {
    status: ProjectStatus,
    url: Option<String>,
    admin_url: Option<String>,
    error_message: Option<String>,
    last_active_at: Option<DateTime<Utc>>,
}

impl DeploymentState {
    /// Deploy in progress; clears urls and any previous error.
    pub fn starting() -> Self {
        Self {
            status: ProjectStatus::Starting,
            url: None,
            admin_url: None,
            error_message: None,
            last_active_at: None,
        }
    }

    pub fn running(url: String, admin_url: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            status: ProjectStatus::Running,
            url: Some(url),
            admin_url,
            error_message: None,
            last_active_at: Some(now),
        }
    }

    pub fn stopped() -> Self {
        Self {
            status: ProjectStatus::Stopped,
            url: None,
            admin_url: None,
            error_message: None,
            last_active_at: None,
        }
    }

    pub fn failed(message: String) -> Self {
        Self {
            status: ProjectStatus::Error,
            url: None,
            admin_url: None,
            error_message: Some(message),
            last_active_at: None,
        }
    }

    pub fn status(&self) -> ProjectStatus {
        self.status
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn admin_url(&self) -> Option<&str> {
        self.admin_url.as_deref()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn last_active_at(&self) -> Option<DateTime<Utc>> {
        self.last_active_at
    }
}

/// Formats a timestamp the way it is stored: fixed millisecond precision in
/// UTC, so stored values order lexicographically.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(column: &'static str, value: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| DatabaseError::InvalidValue {
            column,
            value: value.to_string(),
        })
}
