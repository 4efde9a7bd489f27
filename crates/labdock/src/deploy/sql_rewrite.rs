//! Init script clean-up.
//!
//! Student dumps often create, select or drop their own database. The
//! deployment provisions a project-scoped database instead, so those
//! statements are removed; table and data statements are kept verbatim.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::RuntimeError;

static RE_DATABASE_DDL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^[ \t]*(?:CREATE|DROP)[ \t]+(?:DATABASE|SCHEMA)\b[^;]*;[ \t]*(?:\r?\n)?").unwrap()
});
// The mysql client accepts `USE db` without a terminator.
static RE_USE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?im)^[ \t]*USE[ \t]+[`"]?[\w$-]+[`"]?[ \t]*(?:;[ \t]*)?(?:\r?\n|$)"#).unwrap()
});

/// Result of rewriting one script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rewrite {
    pub sql: String,
    pub removed: usize,
}

impl Rewrite {
    pub fn changed(&self) -> bool {
        self.removed > 0
    }
}

pub fn rewrite_sql(sql: &str) -> Rewrite {
    let mut removed = RE_DATABASE_DDL.find_iter(sql).count();
    let without_ddl = RE_DATABASE_DDL.replace_all(sql, "");
    removed += RE_USE.find_iter(&without_ddl).count();
    let sql = RE_USE.replace_all(&without_ddl, "").into_owned();
    Rewrite { sql, removed }
}

/// Rewrites the script in place. Returns the number of statements removed.
pub fn rewrite_file(path: &Path) -> Result<usize, RuntimeError> {
    let bytes = std::fs::read(path).map_err(|e| RuntimeError::io(path, e))?;
    let original = String::from_utf8_lossy(&bytes);
    let rewrite = rewrite_sql(&original);
    if rewrite.changed() {
        std::fs::write(path, rewrite.sql.as_bytes()).map_err(|e| RuntimeError::io(path, e))?;
    }
    Ok(rewrite.removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_removes_database_statements_keeps_tables() {
        let sql = "DROP DATABASE IF EXISTS shop;\n\
                   CREATE DATABASE shop CHARACTER SET utf8mb4;\n\
                   USE `shop`;\n\
                   CREATE TABLE users (id INT PRIMARY KEY, name VARCHAR(20));\n\
                   INSERT INTO users VALUES (1, 'ana');\n";

        let rewrite = rewrite_sql(sql);

        assert_eq!(rewrite.removed, 3);
        assert_eq!(
            rewrite.sql,
            "CREATE TABLE users (id INT PRIMARY KEY, name VARCHAR(20));\n\
             INSERT INTO users VALUES (1, 'ana');\n"
        );
    }

    #[test]
    fn test_lowercase_and_schema_keyword() {
        let rewrite = rewrite_sql("create schema if not exists app;\nuse app;\nselect 1;\n");
        assert_eq!(rewrite.removed, 2);
        assert_eq!(rewrite.sql, "select 1;\n");
    }

    #[test]
    fn test_use_without_semicolon() {
        let rewrite = rewrite_sql("CREATE DATABASE shop;\nUSE shop\nCREATE TABLE t (id INT);\n");
        assert_eq!(rewrite.removed, 2);
        assert_eq!(rewrite.sql, "CREATE TABLE t (id INT);\n");

        let rewrite = rewrite_sql("CREATE TABLE t (id INT);\r\nuse `shop`  \r\nINSERT INTO t VALUES (1);\r\nUSE shop");
        assert_eq!(rewrite.removed, 2);
        assert_eq!(rewrite.sql, "CREATE TABLE t (id INT);\r\nINSERT INTO t VALUES (1);\r\n");
    }

    #[test]
    fn test_column_named_use_is_kept() {
        let sql = "CREATE TABLE t (\n  use INT,\n  users INT\n);\n";
        let rewrite = rewrite_sql(sql);
        assert!(!rewrite.changed());
        assert_eq!(rewrite.sql, sql);
    }

    #[test]
    fn test_rewrite_file_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.sql");
        std::fs::write(&path, "CREATE DATABASE x;\nCREATE TABLE a (id INT);\n").unwrap();

        assert_eq!(rewrite_file(&path).unwrap(), 1);
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "CREATE TABLE a (id INT);\n"
        );
        assert_eq!(rewrite_file(&path).unwrap(), 0);
    }
}
