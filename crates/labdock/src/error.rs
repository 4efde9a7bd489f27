use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::archive::ExtractError;
use crate::sandbox::SandboxError;

#[derive(Error, Debug)]
pub enum LabdockError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Archive '{reference}' not found")]
    NotFound { reference: String },

    #[error("Invalid archive reference '{reference}': {source}")]
    InvalidReference {
        reference: String,
        #[source]
        source: SandboxError,
    },

    #[error("Failed to read archive '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Object store returned HTTP {status} for '{reference}'")]
    HttpStatus { reference: String, status: u16 },

    #[error("Object store request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Object store credentials unavailable: {0}")]
    Credentials(#[from] crate::secrets::SecretError),
}

/// Errors surfaced by the deployment engine and the viewer cache.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Extraction failed: {0}")]
    Extraction(#[from] ExtractError),

    #[error("Archive fetch failed: {0}")]
    Fetch(#[from] StorageError),

    #[error("Container engine exited with {}: {stderr}", exit_code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string()))]
    EngineInvocation {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("{operation} timed out after {}", format_elapsed(.after))]
    Timeout { operation: String, after: Duration },

    #[error("Access denied: {0}")]
    SandboxViolation(#[from] SandboxError),

    #[error("Deployment failed: {0}")]
    DeployFailed(String),

    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

impl RuntimeError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        RuntimeError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RuntimeError::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns true for errors that belong to the caller rather than the deployment.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            RuntimeError::NotFound { .. }
                | RuntimeError::Forbidden(_)
                | RuntimeError::Conflict(_)
                | RuntimeError::SandboxViolation(_)
        )
    }
}

/// Whole seconds when exact, milliseconds otherwise.
fn format_elapsed(after: &Duration) -> String {
    if after.subsec_millis() == 0 && after.as_secs() > 0 {
        format!("{}s", after.as_secs())
    } else {
        format!("{}ms", after.as_millis())
    }
}

pub type Result<T> = std::result::Result<T, LabdockError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_invocation_message_includes_exit_code() {
        let err = RuntimeError::EngineInvocation {
            exit_code: Some(17),
            stderr: "no such image".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Container engine exited with 17: no such image"
        );
    }

    #[test]
    fn test_engine_invocation_without_exit_code() {
        let err = RuntimeError::EngineInvocation {
            exit_code: None,
            stderr: "killed".to_string(),
        };
        assert!(err.to_string().contains("signal"));
    }

    #[test]
    fn test_timeout_message_keeps_sub_second_precision() {
        let short = RuntimeError::Timeout {
            operation: "Archive fetch".to_string(),
            after: Duration::from_millis(50),
        };
        assert_eq!(short.to_string(), "Archive fetch timed out after 50ms");

        let long = RuntimeError::Timeout {
            operation: "Container build and start".to_string(),
            after: Duration::from_secs(600),
        };
        assert_eq!(long.to_string(), "Container build and start timed out after 600s");

        let mixed = RuntimeError::Timeout {
            operation: "Container logs".to_string(),
            after: Duration::from_millis(1500),
        };
        assert_eq!(mixed.to_string(), "Container logs timed out after 1500ms");
    }

    #[test]
    fn test_client_errors() {
        assert!(RuntimeError::not_found("Project", "p1").is_client_error());
        assert!(RuntimeError::Conflict("busy".into()).is_client_error());
        assert!(!RuntimeError::DeployFailed("boom".into()).is_client_error());
    }
}
