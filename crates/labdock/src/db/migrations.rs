//! Schema migrations keyed on SQLite's `user_version`.
//!
//! Step `n` of the list moves the schema from version `n` to `n + 1`. A step
//! and its version bump commit in one transaction, so an interrupted upgrade
//! leaves the previous version intact.

use rusqlite::Connection;

use super::error::DatabaseError;

type Step = (&'static str, &'static str);

const STEPS: &[Step] = &[
    ("labs", include_str!("sql/001_create_labs.sql")),
    ("projects", include_str!("sql/002_create_projects.sql")),
];

/// Schema version this build writes.
pub const SCHEMA_VERSION: u32 = STEPS.len() as u32;

pub fn schema_version(conn: &Connection) -> Result<u32, DatabaseError> {
    Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
}

/// Brings the schema up to [`SCHEMA_VERSION`]. Returns the number of steps applied.
pub fn migrate(conn: &Connection) -> Result<usize, DatabaseError> {
    apply(conn, STEPS)
}

fn apply(conn: &Connection, steps: &[Step]) -> Result<usize, DatabaseError> {
    let found = schema_version(conn)?;
    let known = steps.len() as u32;
    if found > known {
        return Err(DatabaseError::Migration {
            version: found,
            reason: format!(
                "database schema is newer than this build supports (v{})",
                known
            ),
        });
    }

    let pending = &steps[found as usize..];
    for (offset, (name, sql)) in pending.iter().enumerate() {
        let version = found + offset as u32 + 1;
        log::info!("Applying schema v{} ({})", version, name);

        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(sql)
            .and_then(|_| tx.pragma_update(None, "user_version", version))
            .map_err(|e| DatabaseError::Migration {
                version,
                reason: e.to_string(),
            })?;
        tx.commit()?;
    }

    Ok(pending.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_database_reaches_current_version() {
        let conn = Connection::open_in_memory().unwrap();

        assert_eq!(migrate(&conn).unwrap(), STEPS.len());
        assert_eq!(schema_version(&conn).unwrap(), SCHEMA_VERSION);

        // the viewer backfills this column
        conn.prepare("SELECT total_size, last_active_at FROM projects")
            .unwrap();
    }

    #[test]
    fn test_second_run_applies_nothing() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();

        assert_eq!(migrate(&conn).unwrap(), 0);
        assert_eq!(schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_newer_schema_is_refused() {
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "user_version", SCHEMA_VERSION + 3)
            .unwrap();

        let err = migrate(&conn).unwrap_err();

        assert!(matches!(err, DatabaseError::Migration { version, .. } if version == SCHEMA_VERSION + 3));
    }

    #[test]
    fn test_failed_step_keeps_previous_version() {
        let conn = Connection::open_in_memory().unwrap();
        let steps: &[Step] = &[
            ("one", "CREATE TABLE one (id INTEGER);"),
            ("broken", "CREATE TABLE two (id INTEGER); CREATE TABLE one (id INTEGER);"),
        ];

        let err = apply(&conn, steps).unwrap_err();

        assert!(matches!(err, DatabaseError::Migration { version: 2, .. }));
        assert_eq!(schema_version(&conn).unwrap(), 1);
        let two: u32 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE name = 'two'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(two, 0);
    }
}
