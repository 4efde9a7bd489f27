//! Project and lab repository: row-level access to the `projects` and
//! `labs` tables.

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DatabaseError};

/// A raw project row from the database.
#[derive(Debug, Clone, Default)]
pub struct ProjectRow {
    pub id: String,
    pub owner_id: String,
    pub lab_id: Option<String>,
    pub archive_ref: Option<String>,
    pub workload_type: Option<String>,
    pub status: String,
    pub url: Option<String>,
    pub admin_url: Option<String>,
    pub error_message: Option<String>,
    pub last_active_at: Option<String>,
    pub total_size: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

impl ProjectRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            owner_id: row.get("owner_id")?,
            lab_id: row.get("lab_id")?,
            archive_ref: row.get("archive_ref")?,
            workload_type: row.get("workload_type")?,
            status: row.get("status")?,
            url: row.get("url")?,
            admin_url: row.get("admin_url")?,
            error_message: row.get("error_message")?,
            last_active_at: row.get("last_active_at")?,
            total_size: row.get("total_size")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// The deployment columns written together by every status transition.
#[derive(Debug, Clone)]
pub struct StateColumns<'a> {
    pub status: &'a str,
    pub url: Option<&'a str>,
    pub admin_url: Option<&'a str>,
    pub error_message: Option<&'a str>,
    pub last_active_at: Option<&'a str>,
    pub updated_at: &'a str,
}

/// A raw lab row from the database.
#[derive(Debug, Clone)]
pub struct LabRow {
    pub id: String,
    pub name: String,
    pub section: Option<String>,
    pub deadline: Option<String>,
}

pub fn insert(db: &Database, project: &ProjectRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO projects (id, owner_id, lab_id, archive_ref, workload_type, status, url,
             admin_url, error_message, last_active_at, total_size, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                project.id,
                project.owner_id,
                project.lab_id,
                project.archive_ref,
                project.workload_type,
                project.status,
                project.url,
                project.admin_url,
                project.error_message,
                project.last_active_at,
                project.total_size,
                project.created_at,
                project.updated_at,
            ],
        )?;
        Ok(())
    })
}

pub fn find_by_id(db: &Database, id: &str) -> Result<Option<ProjectRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM projects WHERE id = ?1",
                params![id],
                ProjectRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Writes all deployment columns in one statement. Returns false when the
/// project does not exist.
pub fn write_state(db: &Database, id: &str, state: &StateColumns<'_>) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE projects SET status = ?2, url = ?3, admin_url = ?4, error_message = ?5,
             last_active_at = ?6, updated_at = ?7 WHERE id = ?1",
            params![
                id,
                state.status,
                state.url,
                state.admin_url,
                state.error_message,
                state.last_active_at,
                state.updated_at,
            ],
        )?;
        Ok(changed > 0)
    })
}

pub fn set_workload_type(
    db: &Database,
    id: &str,
    workload_type: &str,
    updated_at: &str,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE projects SET workload_type = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, workload_type, updated_at],
        )?;
        Ok(())
    })
}

/// Refreshes `last_active_at`, only for projects that are still running.
pub fn touch_active(db: &Database, id: &str, now: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE projects SET last_active_at = ?2 WHERE id = ?1 AND status = 'running'",
            params![id, now],
        )?;
        Ok(changed > 0)
    })
}

/// Replaces the archive reference and clears the recorded size so the next
/// structure listing backfills it again.
pub fn set_archive_ref(
    db: &Database,
    id: &str,
    archive_ref: &str,
    updated_at: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE projects SET archive_ref = ?2, total_size = NULL, updated_at = ?3 WHERE id = ?1",
            params![id, archive_ref, updated_at],
        )?;
        Ok(changed > 0)
    })
}

/// Records the total size only if none has been recorded yet.
pub fn backfill_total_size(db: &Database, id: &str, total_size: i64) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE projects SET total_size = ?2 WHERE id = ?1 AND total_size IS NULL",
            params![id, total_size],
        )?;
        Ok(changed > 0)
    })
}

/// Running projects whose last activity is older than `cutoff` (or unknown).
pub fn list_idle_running(db: &Database, cutoff: &str) -> Result<Vec<ProjectRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM projects WHERE status = 'running'
             AND (last_active_at IS NULL OR last_active_at < ?1)
             ORDER BY last_active_at ASC",
        )?;
        let rows = stmt
            .query_map(params![cutoff], ProjectRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

pub fn insert_lab(db: &Database, lab: &LabRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO labs (id, name, section, deadline) VALUES (?1, ?2, ?3, ?4)",
            params![lab.id, lab.name, lab.section, lab.deadline],
        )?;
        Ok(())
    })
}

pub fn find_lab(db: &Database, id: &str) -> Result<Option<LabRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT id, name, section, deadline FROM labs WHERE id = ?1",
                params![id],
                |row| {
                    Ok(LabRow {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        section: row.get(2)?,
                        deadline: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    })
}
