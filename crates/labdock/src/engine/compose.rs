use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command as TokioCommand;

use super::{ContainerEngine, EngineOutput, EngineScope};
use crate::config::EngineConfig;
use crate::error::RuntimeError;

/// Drives Docker Compose v2 through the `docker` CLI.
pub struct ComposeEngine {
    binary: String,
    build_timeout: Duration,
    command_timeout: Duration,
}

impl ComposeEngine {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            build_timeout: Duration::from_secs(config.build_timeout_secs),
            command_timeout: Duration::from_secs(config.command_timeout_secs),
        }
    }

    /// `compose -p <project> [-f <manifest>]`, the prefix of every scoped call.
    fn compose_args(scope: &EngineScope) -> Vec<String> {
        let mut args = vec!["compose".to_string(), "-p".to_string(), scope.project.clone()];
        if scope.has_manifest() {
            args.push("-f".to_string());
            args.push(scope.manifest_path().to_string_lossy().into_owned());
        }
        args
    }

    async fn run(
        &self,
        operation: &str,
        args: &[String],
        scope: Option<&EngineScope>,
        timeout: Duration,
    ) -> Result<EngineOutput, RuntimeError> {
        let mut cmd = TokioCommand::new(&self.binary);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(scope) = scope.filter(|s| s.workdir.is_dir()) {
            cmd.current_dir(&scope.workdir);
        }

        log::debug!("Running {} {}", self.binary, args.join(" "));

        let output = match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(result) => result.map_err(|e| RuntimeError::EngineInvocation {
                exit_code: None,
                stderr: format!("failed to run '{}': {}", self.binary, e),
            })?,
            Err(_) => {
                return Err(RuntimeError::Timeout {
                    operation: operation.to_string(),
                    after: timeout,
                })
            }
        };

        Ok(EngineOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[async_trait]
impl ContainerEngine for ComposeEngine {
    async fn build_and_start(&self, scope: &EngineScope) -> Result<EngineOutput, RuntimeError> {
        let mut args = Self::compose_args(scope);
        args.extend(
            ["up", "-d", "--build", "--remove-orphans"]
                .iter()
                .map(|s| s.to_string()),
        );
        self.run("Container build and start", &args, Some(scope), self.build_timeout)
            .await
    }

    async fn tear_down(&self, scope: &EngineScope) -> Result<EngineOutput, RuntimeError> {
        let mut args = Self::compose_args(scope);
        args.extend(
            ["down", "-v", "--remove-orphans", "--timeout", "10"]
                .iter()
                .map(|s| s.to_string()),
        );
        self.run("Container tear down", &args, Some(scope), self.command_timeout)
            .await
    }

    async fn list_running(&self, name_prefix: &str) -> Result<Vec<String>, RuntimeError> {
        let args = vec![
            "ps".to_string(),
            "--filter".to_string(),
            format!("name=^{}", name_prefix),
            "--format".to_string(),
            "{{.Names}}".to_string(),
        ];
        let output = self
            .run("Container listing", &args, None, self.command_timeout)
            .await?
            .into_result()?;

        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|name| name.starts_with(name_prefix))
            .map(str::to_string)
            .collect())
    }

    async fn stream_logs(&self, scope: &EngineScope, tail: usize) -> Result<String, RuntimeError> {
        let mut args = Self::compose_args(scope);
        args.extend([
            "logs".to_string(),
            "--no-color".to_string(),
            "--tail".to_string(),
            tail.to_string(),
        ]);
        let output = self
            .run("Container logs", &args, Some(scope), self.command_timeout)
            .await?
            .into_result()?;
        // compose writes service logs to both streams
        let mut text = output.stdout;
        if !output.stderr.trim().is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&output.stderr);
        }
        Ok(text)
    }
}
