//! Workload classification of an extracted codebase.
//!
//! Best effort: anything unreadable falls back to [`Detection::Static`].

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::project::WorkloadType;

/// Listen port assumed for a Dockerfile without a usable `EXPOSE`.
pub const DEFAULT_LISTEN_PORT: u16 = 3000;

/// Directories searched, after the code root, for a database init script.
const DB_INIT_DIRS: &[&str] = &["db", "database", "sql"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Runtime {
    /// The project ships its own container build file.
    Dockerfile,
    Node,
    Php,
    Python,
}

impl Runtime {
    pub fn default_port(&self) -> u16 {
        match self {
            Runtime::Dockerfile | Runtime::Node => DEFAULT_LISTEN_PORT,
            Runtime::Php => 80,
            Runtime::Python => 8000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Detection {
    Static,
    Application {
        runtime: Runtime,
        listen_port: u16,
        /// Init script, relative to the code root.
        db_init: Option<PathBuf>,
    },
}

impl Detection {
    pub fn workload_type(&self) -> WorkloadType {
        match self {
            Detection::Static => WorkloadType::Static,
            Detection::Application { .. } => WorkloadType::Application,
        }
    }

    pub fn needs_database_init(&self) -> bool {
        matches!(self, Detection::Application { db_init: Some(_), .. })
    }
}

impl std::fmt::Display for Detection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Detection::Static => write!(f, "static"),
            Detection::Application {
                runtime,
                listen_port,
                db_init,
            } => {
                write!(f, "application (runtime={:?}, port={}", runtime, listen_port)?;
                match db_init {
                    Some(path) => write!(f, ", db_init={})", path.display()),
                    None => write!(f, ")"),
                }
            }
        }
    }
}

pub fn detect(code_root: &Path) -> Detection {
    if !code_root.is_dir() {
        log::warn!(
            "Detection root {} is not a directory, classifying as static",
            code_root.display()
        );
        return Detection::Static;
    }

    let runtime = if code_root.join("Dockerfile").is_file() {
        Runtime::Dockerfile
    } else if code_root.join("package.json").is_file() {
        Runtime::Node
    } else if code_root.join("composer.json").is_file() {
        Runtime::Php
    } else if code_root.join("requirements.txt").is_file() {
        Runtime::Python
    } else {
        return Detection::Static;
    };

    let listen_port = match runtime {
        Runtime::Dockerfile => match std::fs::read_to_string(code_root.join("Dockerfile")) {
            Ok(content) => parse_expose(&content).unwrap_or(DEFAULT_LISTEN_PORT),
            Err(e) => {
                log::warn!("Failed to read Dockerfile: {}", e);
                DEFAULT_LISTEN_PORT
            }
        },
        other => other.default_port(),
    };

    Detection::Application {
        runtime,
        listen_port,
        db_init: find_db_init(code_root),
    }
}

/// Port of the first `EXPOSE` directive, e.g. `EXPOSE 8080` or `EXPOSE 8080/tcp`.
pub fn parse_expose(dockerfile: &str) -> Option<u16> {
    dockerfile.lines().find_map(|line| {
        let mut words = line.split_whitespace();
        let keyword = words.next()?;
        if !keyword.eq_ignore_ascii_case("EXPOSE") {
            return None;
        }
        let port = words.next()?.split('/').next()?;
        port.parse::<u16>().ok().filter(|p| *p > 0)
    })
}

/// First `.sql` file (lexicographic) in the root, then in the conventional
/// init directories.
fn find_db_init(code_root: &Path) -> Option<PathBuf> {
    std::iter::once(PathBuf::new())
        .chain(DB_INIT_DIRS.iter().map(PathBuf::from))
        .find_map(|dir| first_sql_file(&code_root.join(&dir)).map(|name| dir.join(name)))
}

fn first_sql_file(dir: &Path) -> Option<String> {
    let entries = std::fs::read_dir(dir).ok()?;
    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter_map(|e| e.file_name().to_str().map(str::to_string))
        .filter(|name| name.to_ascii_lowercase().ends_with(".sql") && !name.starts_with('.'))
        .collect();
    names.sort();
    names.into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;
    use assert_fs::TempDir;

    #[test]
    fn test_plain_html_is_static() {
        let dir = TempDir::new().unwrap();
        dir.child("index.html").write_str("<h1>hi</h1>").unwrap();
        dir.child("style.css").write_str("h1{}").unwrap();

        assert_eq!(detect(dir.path()), Detection::Static);
    }

    #[test]
    fn test_node_with_sql_needs_db_init() {
        let dir = TempDir::new().unwrap();
        dir.child("package.json").write_str("{}").unwrap();
        dir.child("db.sql").write_str("CREATE TABLE t (id INT);").unwrap();

        let detection = detect(dir.path());
        assert_eq!(
            detection,
            Detection::Application {
                runtime: Runtime::Node,
                listen_port: 3000,
                db_init: Some(PathBuf::from("db.sql")),
            }
        );
        assert!(detection.needs_database_init());
        assert_eq!(detection.workload_type(), WorkloadType::Application);
    }

    #[test]
    fn test_dockerfile_wins_and_port_parsed() {
        let dir = TempDir::new().unwrap();
        dir.child("package.json").write_str("{}").unwrap();
        dir.child("Dockerfile")
            .write_str("FROM node:20\n# EXPOSE 1\nexpose 8080/tcp\nEXPOSE 9090\n")
            .unwrap();

        match detect(dir.path()) {
            Detection::Application {
                runtime,
                listen_port,
                db_init,
            } => {
                assert_eq!(runtime, Runtime::Dockerfile);
                assert_eq!(listen_port, 8080);
                assert!(db_init.is_none());
            }
            Detection::Static => panic!("expected application"),
        }
    }

    #[test]
    fn test_dockerfile_without_expose_uses_fallback_port() {
        let dir = TempDir::new().unwrap();
        dir.child("Dockerfile").write_str("FROM python:3.12\n").unwrap();
        assert!(matches!(
            detect(dir.path()),
            Detection::Application {
                listen_port: DEFAULT_LISTEN_PORT,
                ..
            }
        ));
    }

    #[test]
    fn test_init_script_found_in_db_dir() {
        let dir = TempDir::new().unwrap();
        dir.child("composer.json").write_str("{}").unwrap();
        dir.child("database/b_seed.sql").write_str("").unwrap();
        dir.child("database/a_schema.sql").write_str("").unwrap();

        assert_eq!(
            detect(dir.path()),
            Detection::Application {
                runtime: Runtime::Php,
                listen_port: 80,
                db_init: Some(PathBuf::from("database/a_schema.sql")),
            }
        );
    }

    #[test]
    fn test_missing_root_is_static() {
        assert_eq!(detect(Path::new("/nonexistent/labdock/code")), Detection::Static);
    }

    #[test]
    fn test_parse_expose_ignores_garbage() {
        assert_eq!(parse_expose("EXPOSE $PORT\n"), None);
        assert_eq!(parse_expose("EXPOSE 0\n"), None);
        assert_eq!(parse_expose("  EXPOSE 5000  \n"), Some(5000));
    }
}
