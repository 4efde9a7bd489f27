//! Container engine capability.
//!
//! The deployment engine only needs four things from whatever runs the
//! containers; [`ComposeEngine`] provides them by shelling out to
//! `docker compose`, and tests substitute a fake.

pub mod compose;

use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::RuntimeError;

pub use compose::ComposeEngine;

/// File name of the generated manifest inside a workspace.
pub const MANIFEST_FILE: &str = "docker-compose.yml";

/// Identifies one project's group of containers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineScope {
    /// Compose project name; unique per project.
    pub project: String,
    pub workdir: PathBuf,
}

impl EngineScope {
    pub fn new(project: impl Into<String>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            project: project.into(),
            workdir: workdir.into(),
        }
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.workdir.join(MANIFEST_FILE)
    }

    pub fn has_manifest(&self) -> bool {
        self.manifest_path().is_file()
    }
}

/// Captured result of one engine invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineOutput {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl EngineOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Converts a non-zero exit into [`RuntimeError::EngineInvocation`].
    pub fn into_result(self) -> Result<EngineOutput, RuntimeError> {
        if self.success() {
            Ok(self)
        } else {
            Err(RuntimeError::EngineInvocation {
                exit_code: self.exit_code,
                stderr: format_engine_error(&self),
            })
        }
    }
}

/// Prefers stderr, falls back to stdout, then to the exit code.
pub fn format_engine_error(output: &EngineOutput) -> String {
    let stderr = output.stderr.trim();
    let stdout = output.stdout.trim();

    match (stderr.is_empty(), stdout.is_empty()) {
        (true, true) => format!(
            "Command failed with exit code {}",
            output.exit_code.unwrap_or(-1)
        ),
        (true, false) => stdout.to_string(),
        (false, _) => stderr.to_string(),
    }
}

#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Builds images and starts every service of the manifest in `scope`.
    /// Returns the captured output whatever the exit code; timeouts and
    /// spawn failures are errors.
    async fn build_and_start(&self, scope: &EngineScope) -> Result<EngineOutput, RuntimeError>;

    /// Removes the scope's containers, networks and volumes. Succeeds when
    /// nothing is running.
    async fn tear_down(&self, scope: &EngineScope) -> Result<EngineOutput, RuntimeError>;

    /// Names of running containers whose name starts with `name_prefix`.
    async fn list_running(&self, name_prefix: &str) -> Result<Vec<String>, RuntimeError>;

    /// The last `tail` lines of the scope's runtime logs.
    async fn stream_logs(&self, scope: &EngineScope, tail: usize) -> Result<String, RuntimeError>;
}
