//! Deployment engine: deploy, stop and logs for one project at a time.
//!
//! State machine per project:
//!
//! ```text
//! Stopped -> Starting -> Running | Error
//! Running -> Stopped          (stop or idle reap)
//! Error   -> Starting         (redeploy)
//! ```
//!
//! Deploy and stop for the same project are serialised through
//! [`ProjectLocks`]; a second deploy while one is in flight is a conflict,
//! a stop waits for the in-flight operation.

pub mod locks;
pub mod sql_rewrite;
pub mod workspace;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info_span, Instrument};

use crate::archive::{self, ArchiveFormat};
use crate::config::RuntimeConfig;
use crate::detect::{self, Detection};
use crate::engine::{ContainerEngine, EngineScope};
use crate::error::RuntimeError;
use crate::manifest::{self, ManifestSettings, ProjectNames};
use crate::project::{DeploymentState, Lab, Project, ProjectStatus, ProjectStore, WorkloadType};
use crate::sanitize::{self, MAX_ERROR_MESSAGE_CHARS};
use crate::storage::{self, ObjectStore};

pub use locks::{ProjectGuard, ProjectLocks};
pub use workspace::{DeployLog, Workspace};

/// Fallback for the logs view when there is neither a workspace nor an error.
pub const NO_LOGS: &str = "No logs available";

#[derive(Debug, Clone)]
pub struct DeploySettings {
    pub workspace_root: PathBuf,
    pub manifest: ManifestSettings,
    pub fetch_timeout: Duration,
    pub default_tail: usize,
}

impl From<&RuntimeConfig> for DeploySettings {
    fn from(config: &RuntimeConfig) -> Self {
        Self {
            workspace_root: config.workspace_root.clone(),
            manifest: ManifestSettings::from(config),
            fetch_timeout: Duration::from_secs(config.object_store.timeout_secs()),
            default_tail: config.logs.default_tail,
        }
    }
}

/// Where a running deployment can be reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeployOutcome {
    pub url: String,
    pub admin_url: Option<String>,
    /// False when an already running deployment was confirmed live.
    pub redeployed: bool,
}

pub struct DeploymentEngine {
    store: Arc<dyn ProjectStore>,
    objects: Arc<dyn ObjectStore>,
    engine: Arc<dyn ContainerEngine>,
    locks: ProjectLocks,
    settings: DeploySettings,
}

impl DeploymentEngine {
    pub fn new(
        settings: DeploySettings,
        store: Arc<dyn ProjectStore>,
        objects: Arc<dyn ObjectStore>,
        engine: Arc<dyn ContainerEngine>,
        locks: ProjectLocks,
    ) -> Self {
        Self {
            store,
            objects,
            engine,
            locks,
            settings,
        }
    }

    pub fn workspace(&self, names: &ProjectNames) -> Workspace {
        Workspace::new(&self.settings.workspace_root, &names.slug)
    }

    fn scope(&self, names: &ProjectNames) -> EngineScope {
        EngineScope::new(names.compose_project.clone(), self.workspace(names).root())
    }

    fn load_project(&self, project_id: &str) -> Result<Project, RuntimeError> {
        self.store
            .find_project(project_id)?
            .ok_or_else(|| RuntimeError::not_found("Project", project_id))
    }

    /// Deploys the project, or confirms an existing deployment is live.
    ///
    /// `owner` is the caller's assertion of who owns the project; a mismatch
    /// is `Forbidden`. Failures after the project entered `Starting` leave it
    /// in `Error` and return [`RuntimeError::DeployFailed`].
    pub async fn deploy(
        &self,
        project_id: &str,
        owner: Option<&str>,
    ) -> Result<DeployOutcome, RuntimeError> {
        let run_id = uuid::Uuid::new_v4();
        let span = info_span!("deploy", project = %project_id, run_id = %run_id);
        self.deploy_inner(project_id, owner, run_id)
            .instrument(span)
            .await
    }

    async fn deploy_inner(
        &self,
        project_id: &str,
        owner: Option<&str>,
        run_id: uuid::Uuid,
    ) -> Result<DeployOutcome, RuntimeError> {
        let project = self.load_project(project_id)?;
        if let Some(owner) = owner {
            if !project.is_owned_by(owner) {
                return Err(RuntimeError::Forbidden(format!(
                    "Project '{}' is not owned by '{}'",
                    project_id, owner
                )));
            }
        }
        let lab = match project.lab_id.as_deref() {
            Some(lab_id) => Some(
                self.store
                    .find_lab(lab_id)?
                    .ok_or_else(|| RuntimeError::not_found("Lab", lab_id))?,
            ),
            None => None,
        };
        let names = ProjectNames::derive(project_id)?;

        let _guard = self.locks.try_lock(project_id).ok_or_else(|| {
            RuntimeError::Conflict(format!(
                "An operation on project '{}' is already in progress",
                project_id
            ))
        })?;
        // Re-read under the lock; a stop may have finished in between.
        let project = self.load_project(project_id)?;

        if project.status == ProjectStatus::Running {
            if let Some(outcome) = self.confirm_live(&project, &names).await? {
                return Ok(outcome);
            }
            log::info!(
                "Project {} is marked running but its workload is gone, redeploying",
                project_id
            );
            self.store.write_state(project_id, &DeploymentState::stopped())?;
        }

        let archive_ref = project
            .archive()
            .ok_or_else(|| {
                RuntimeError::Configuration(format!(
                    "Project '{}' has no uploaded archive",
                    project_id
                ))
            })?
            .to_string();

        self.store.write_state(project_id, &DeploymentState::starting())?;
        log::info!("Deploying project {} (run {})", project_id, run_id);

        let workspace = self.workspace(&names);
        let context = PipelineContext {
            project: &project,
            lab: lab.as_ref(),
            names: &names,
            workspace: &workspace,
            archive_ref: &archive_ref,
            run_id,
        };

        match self.run_pipeline(&context).await {
            Ok((url, admin_url)) => {
                self.store.write_state(
                    project_id,
                    &DeploymentState::running(url.clone(), admin_url.clone(), Utc::now()),
                )?;
                workspace
                    .log()
                    .line_best_effort(&format!("Deployment running at {}", url));
                log::info!("Project {} deployed at {}", project_id, url);
                Ok(DeployOutcome {
                    url,
                    admin_url,
                    redeployed: true,
                })
            }
            Err(e) => {
                let full = e.to_string();
                let message = sanitize::truncate_message(&full, MAX_ERROR_MESSAGE_CHARS);
                if workspace.exists() {
                    workspace
                        .log()
                        .line_best_effort(&format!("Deployment failed: {}", full));
                }
                log::error!("Deployment of project {} failed: {}", project_id, message);
                self.store
                    .write_state(project_id, &DeploymentState::failed(message.clone()))?;
                Err(RuntimeError::DeployFailed(message))
            }
        }
    }

    /// Fast path for a project already marked running. Returns `None` when
    /// the workload container is not actually up.
    async fn confirm_live(
        &self,
        project: &Project,
        names: &ProjectNames,
    ) -> Result<Option<DeployOutcome>, RuntimeError> {
        let Some(url) = project.url.clone() else {
            return Ok(None);
        };

        let running = match self.engine.list_running(&names.container_prefix()).await {
            Ok(running) => running,
            Err(e) => {
                log::warn!("Liveness check for project {} failed: {}", project.id, e);
                return Ok(None);
            }
        };

        let candidates: &[&str] = match project.workload_type {
            Some(WorkloadType::Static) => &["web"],
            Some(WorkloadType::Application) => &["app"],
            None => &["web", "app"],
        };
        let live = candidates
            .iter()
            .any(|key| running.iter().any(|name| *name == names.container(key)));
        if !live {
            return Ok(None);
        }

        self.store.touch_active(&project.id, Utc::now())?;
        log::debug!("Project {} already running at {}", project.id, url);
        Ok(Some(DeployOutcome {
            url,
            admin_url: project.admin_url.clone(),
            redeployed: false,
        }))
    }

    /// Steps 5 to 12 of a deploy. Any error here ends in `Error`.
    async fn run_pipeline(
        &self,
        ctx: &PipelineContext<'_>,
    ) -> Result<(String, Option<String>), RuntimeError> {
        let scope = self.scope(ctx.names);

        let teardown = self
            .engine
            .tear_down(&scope)
            .instrument(info_span!("teardown_previous"))
            .await;

        ctx.workspace.recreate().await?;
        let log = ctx.workspace.log();
        log.line(&format!(
            "Deploy run {} for project {} (owner {})",
            ctx.run_id, ctx.project.id, ctx.project.owner_id
        ))?;
        if let Some(lab) = ctx.lab {
            log.line(&format!(
                "Lab: {} (section {})",
                lab.name,
                lab.section.as_deref().unwrap_or("-")
            ))?;
        }
        match teardown {
            Ok(output) if output.success() => log.line("Previous deployment torn down")?,
            Ok(output) => log.line(&format!(
                "No previous deployment removed (exit code {})",
                output.exit_code.unwrap_or(-1)
            ))?,
            Err(e) => log.line(&format!("Tear down of previous deployment skipped: {}", e))?,
        }

        log.line(&format!("Fetching archive {}", ctx.archive_ref))?;
        let bytes = storage::fetch_with_timeout(
            self.objects.as_ref(),
            ctx.archive_ref,
            self.settings.fetch_timeout,
        )
        .instrument(info_span!("fetch_archive"))
        .await?;
        log.line(&format!("Fetched {} bytes", bytes.len()))?;

        let format = ArchiveFormat::detect(&bytes, ctx.archive_ref)?;
        let code_dir = ctx.workspace.code_dir();
        log.line(&format!("Extracting {} archive", format))?;
        let summary = archive::extract_blocking(bytes, format, code_dir.clone())
            .instrument(info_span!("extract"))
            .await?;
        log.line(&format!(
            "Extracted {} files, {} directories ({} bytes, {} entries skipped)",
            summary.files, summary.directories, summary.bytes, summary.skipped
        ))?;

        let detection = {
            let _step = info_span!("detect").entered();
            if let Some(wrapper) = workspace::flatten_single_wrapper(&code_dir)? {
                log.line(&format!("Flattened single top-level directory '{}'", wrapper))?;
            }
            let detection = detect::detect(&code_dir);
            log.line(&format!("Detected workload: {}", detection))?;
            detection
        };
        self.store
            .set_workload_type(&ctx.project.id, detection.workload_type())?;

        if let Detection::Application {
            db_init: Some(script),
            ..
        } = &detection
        {
            let removed = sql_rewrite::rewrite_file(&code_dir.join(script))?;
            if removed > 0 {
                log.line(&format!(
                    "Rewrote init script {}: removed {} database statement(s)",
                    script.display(),
                    removed
                ))?;
            } else {
                log.line(&format!("Init script {} needed no rewrite", script.display()))?;
            }
        }

        let manifest = manifest::generate(&ctx.project.id, &detection, &self.settings.manifest)?;
        let yaml = manifest
            .to_yaml()
            .map_err(|e| RuntimeError::Configuration(format!("Failed to render manifest: {}", e)))?;
        ctx.workspace.write_manifest(&yaml).await?;
        let services: Vec<&str> = manifest.services.iter().map(|s| s.key.as_str()).collect();
        log.line(&format!("Manifest written with services: {}", services.join(", ")))?;

        log.line("Building and starting services")?;
        let output = match self
            .engine
            .build_and_start(&scope)
            .instrument(info_span!("build_and_start"))
            .await
        {
            Ok(output) => output,
            Err(e) => {
                log.line(&format!("Container engine invocation failed: {}", e))?;
                return Err(e);
            }
        };
        log.line(&format!(
            "Container engine exited with code {}",
            output
                .exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "none (signal)".to_string())
        ))?;
        log.block("stdout", &output.stdout)?;
        log.block("stderr", &output.stderr)?;
        output.into_result()?;

        Ok((manifest.url, manifest.admin_url))
    }

    /// Stops the project's deployment. Idempotent; waits for an in-flight
    /// deploy of the same project.
    pub async fn stop(&self, project_id: &str) -> Result<(), RuntimeError> {
        let span = info_span!("stop", project = %project_id);
        async {
            let names = ProjectNames::derive(project_id)?;
            let _guard = self.locks.lock(project_id).await;
            self.load_project(project_id)?;
            self.tear_down_locked(project_id, &names).await
        }
        .instrument(span)
        .await
    }

    /// Stops the project only if it is still running and idle since before
    /// `cutoff`, checked under the project lock. Returns whether it stopped.
    pub async fn stop_if_idle(
        &self,
        project_id: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<bool, RuntimeError> {
        let names = ProjectNames::derive(project_id)?;
        let _guard = self.locks.lock(project_id).await;
        let project = self.load_project(project_id)?;

        let idle = project.status == ProjectStatus::Running
            && project.last_active_at.map(|t| t < cutoff).unwrap_or(true);
        if !idle {
            return Ok(false);
        }

        self.tear_down_locked(project_id, &names)
            .instrument(info_span!("reap", project = %project_id))
            .await?;
        Ok(true)
    }

    /// Removes the containers and workspace of a project whose record may
    /// already be gone. Writes no state.
    pub async fn release(&self, project_id: &str) -> Result<(), RuntimeError> {
        let names = ProjectNames::derive(project_id)?;
        let _guard = self.locks.lock(project_id).await;
        self.release_resources(project_id, &names)
            .instrument(info_span!("release", project = %project_id))
            .await;
        Ok(())
    }

    /// Caller holds the project lock.
    async fn tear_down_locked(&self, project_id: &str, names: &ProjectNames) -> Result<(), RuntimeError> {
        self.release_resources(project_id, names).await;
        self.store.write_state(project_id, &DeploymentState::stopped())?;
        log::info!("Project {} stopped", project_id);
        Ok(())
    }

    /// Best-effort tear down plus workspace removal.
    async fn release_resources(&self, project_id: &str, names: &ProjectNames) {
        let scope = self.scope(names);
        match self.engine.tear_down(&scope).await {
            Ok(output) if !output.success() => log::debug!(
                "Tear down of project {} exited with {:?}: {}",
                project_id,
                output.exit_code,
                sanitize::single_line(&output.stderr)
            ),
            Ok(_) => {}
            Err(e) => log::warn!("Tear down of project {} failed: {}", project_id, e),
        }

        if let Err(e) = self.workspace(names).remove().await {
            log::warn!("Failed to remove workspace of project {}: {}", project_id, e);
        }
    }

    /// The deploy log plus the tail of the runtime logs, or the last error.
    pub async fn logs(&self, project_id: &str, tail: Option<usize>) -> Result<String, RuntimeError> {
        let project = self.load_project(project_id)?;
        let names = ProjectNames::derive(project_id)?;
        let workspace = self.workspace(&names);
        let tail = tail.unwrap_or(self.settings.default_tail);

        if !workspace.exists() {
            return Ok(project
                .error_message
                .unwrap_or_else(|| NO_LOGS.to_string()));
        }

        let mut text = workspace.log().read().unwrap_or_default();
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&format!("----- runtime logs (last {} lines) -----\n", tail));
        match self.engine.stream_logs(&self.scope(&names), tail).await {
            Ok(runtime) => text.push_str(&sanitize::tail_lines(&runtime, tail)),
            Err(e) => text.push_str(&format!("Runtime logs unavailable: {}", e)),
        }
        Ok(text)
    }
}

struct PipelineContext<'a> {
    project: &'a Project,
    lab: Option<&'a Lab>,
    names: &'a ProjectNames,
    workspace: &'a Workspace,
    archive_ref: &'a str,
    run_id: uuid::Uuid,
}
