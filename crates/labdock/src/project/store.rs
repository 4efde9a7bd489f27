use chrono::{DateTime, Utc};

use super::{format_timestamp, parse_timestamp, DeploymentState, Lab, Project, ProjectStatus, WorkloadType};
use crate::db::project_repo::{self, LabRow, ProjectRow, StateColumns};
use crate::db::{Database, DatabaseError};

/// Access to the externally owned project store.
///
/// Each method is a single atomic statement; callers serialise per project
/// through the deployment locks, not through the store.
pub trait ProjectStore: Send + Sync {
    fn find_project(&self, id: &str) -> Result<Option<Project>, DatabaseError>;

    fn find_lab(&self, id: &str) -> Result<Option<Lab>, DatabaseError>;

    /// Writes status, urls, error message and last activity together.
    /// Returns false when the project no longer exists.
    fn write_state(&self, id: &str, state: &DeploymentState) -> Result<bool, DatabaseError>;

    fn set_workload_type(&self, id: &str, workload_type: WorkloadType) -> Result<(), DatabaseError>;

    /// Refreshes `last_active_at` if the project is still running.
    fn touch_active(&self, id: &str, now: DateTime<Utc>) -> Result<bool, DatabaseError>;

    fn set_archive_ref(&self, id: &str, archive_ref: &str) -> Result<bool, DatabaseError>;

    /// Records the total size unless one is already recorded.
    fn backfill_total_size(&self, id: &str, total_size: u64) -> Result<bool, DatabaseError>;

    fn list_idle_running(&self, cutoff: DateTime<Utc>) -> Result<Vec<Project>, DatabaseError>;
}

fn optional_timestamp(
    column: &'static str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, DatabaseError> {
    value.map(|v| parse_timestamp(column, &v)).transpose()
}

impl TryFrom<ProjectRow> for Project {
    type Error = DatabaseError;

    fn try_from(row: ProjectRow) -> Result<Self, Self::Error> {
        Ok(Project {
            status: ProjectStatus::parse(&row.status)?,
            workload_type: row
                .workload_type
                .as_deref()
                .map(WorkloadType::parse)
                .transpose()?,
            last_active_at: optional_timestamp("last_active_at", row.last_active_at)?,
            total_size: row.total_size.map(|s| s.max(0) as u64),
            created_at: parse_timestamp("created_at", &row.created_at)?,
            updated_at: parse_timestamp("updated_at", &row.updated_at)?,
            id: row.id,
            owner_id: row.owner_id,
            lab_id: row.lab_id,
            archive_ref: row.archive_ref,
            url: row.url,
            admin_url: row.admin_url,
            error_message: row.error_message,
        })
    }
}

impl TryFrom<LabRow> for Lab {
    type Error = DatabaseError;

    fn try_from(row: LabRow) -> Result<Self, Self::Error> {
        Ok(Lab {
            deadline: optional_timestamp("deadline", row.deadline)?,
            id: row.id,
            name: row.name,
            section: row.section,
        })
    }
}

impl ProjectStore for Database {
    fn find_project(&self, id: &str) -> Result<Option<Project>, DatabaseError> {
        project_repo::find_by_id(self, id)?
            .map(Project::try_from)
            .transpose()
    }

    fn find_lab(&self, id: &str) -> Result<Option<Lab>, DatabaseError> {
        project_repo::find_lab(self, id)?.map(Lab::try_from).transpose()
    }

    fn write_state(&self, id: &str, state: &DeploymentState) -> Result<bool, DatabaseError> {
        let last_active_at = state.last_active_at().map(format_timestamp);
        let updated_at = format_timestamp(Utc::now());
        project_repo::write_state(
            self,
            id,
            &StateColumns {
                status: state.status().as_str(),
                url: state.url(),
                admin_url: state.admin_url(),
                error_message: state.error_message(),
                last_active_at: last_active_at.as_deref(),
                updated_at: &updated_at,
            },
        )
    }

    fn set_workload_type(&self, id: &str, workload_type: WorkloadType) -> Result<(), DatabaseError> {
        project_repo::set_workload_type(
            self,
            id,
            workload_type.as_str(),
            &format_timestamp(Utc::now()),
        )
    }

    fn touch_active(&self, id: &str, now: DateTime<Utc>) -> Result<bool, DatabaseError> {
        project_repo::touch_active(self, id, &format_timestamp(now))
    }

    fn set_archive_ref(&self, id: &str, archive_ref: &str) -> Result<bool, DatabaseError> {
        project_repo::set_archive_ref(self, id, archive_ref, &format_timestamp(Utc::now()))
    }

    fn backfill_total_size(&self, id: &str, total_size: u64) -> Result<bool, DatabaseError> {
        let size = i64::try_from(total_size).unwrap_or(i64::MAX);
        project_repo::backfill_total_size(self, id, size)
    }

    fn list_idle_running(&self, cutoff: DateTime<Utc>) -> Result<Vec<Project>, DatabaseError> {
        project_repo::list_idle_running(self, &format_timestamp(cutoff))?
            .into_iter()
            .map(Project::try_from)
            .collect()
    }
}
