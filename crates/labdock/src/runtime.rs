//! The Runtime Core facade used by the controller layer.

use std::sync::Arc;
use std::time::Duration;

use crate::config::RuntimeConfig;
use crate::deploy::{DeployOutcome, DeploySettings, DeploymentEngine, ProjectLocks};
use crate::engine::{ComposeEngine, ContainerEngine};
use crate::error::{LabdockError, RuntimeError};
use crate::project::ProjectStore;
use crate::reaper::{IdleReaper, ReaperScheduler};
use crate::storage::{self, ObjectStore};
use crate::viewer::{FileContent, ProjectTree, ViewerCache};

pub struct RuntimeCore {
    store: Arc<dyn ProjectStore>,
    deployments: Arc<DeploymentEngine>,
    viewer: Arc<ViewerCache>,
    reaper: Arc<IdleReaper>,
    scheduler: ReaperScheduler,
}

impl RuntimeCore {
    pub fn new(
        config: &RuntimeConfig,
        store: Arc<dyn ProjectStore>,
        objects: Arc<dyn ObjectStore>,
        engine: Arc<dyn ContainerEngine>,
    ) -> Self {
        let deployments = Arc::new(DeploymentEngine::new(
            DeploySettings::from(config),
            Arc::clone(&store),
            Arc::clone(&objects),
            engine,
            ProjectLocks::new(),
        ));
        // Viewer locks are separate so browsing never conflicts with a deploy.
        let viewer = Arc::new(ViewerCache::from_config(config, Arc::clone(&store), objects));
        let reaper = Arc::new(IdleReaper::new(
            Arc::clone(&deployments),
            Arc::clone(&store),
            Arc::clone(&viewer),
            Duration::from_secs(config.reaper.deployment_idle_secs),
            Duration::from_secs(config.reaper.cache_idle_secs),
        ));
        let scheduler = ReaperScheduler::from_config(Arc::clone(&reaper), &config.reaper);

        Self {
            store,
            deployments,
            viewer,
            reaper,
            scheduler,
        }
    }

    /// Wires the configured object store and the compose engine.
    pub fn from_config(
        config: &RuntimeConfig,
        store: Arc<dyn ProjectStore>,
    ) -> Result<Self, LabdockError> {
        let objects = storage::from_config(&config.object_store)?;
        let engine = Arc::new(ComposeEngine::new(&config.engine));
        Ok(Self::new(config, store, objects, engine))
    }

    pub async fn deploy(
        &self,
        project_id: &str,
        owner: Option<&str>,
    ) -> Result<DeployOutcome, RuntimeError> {
        self.deployments.deploy(project_id, owner).await
    }

    pub async fn stop(&self, project_id: &str) -> Result<(), RuntimeError> {
        self.deployments.stop(project_id).await
    }

    pub async fn logs(&self, project_id: &str, tail: Option<usize>) -> Result<String, RuntimeError> {
        self.deployments.logs(project_id, tail).await
    }

    pub async fn read_file(
        &self,
        project_id: &str,
        relative_path: &str,
    ) -> Result<FileContent, RuntimeError> {
        self.viewer.get_file_content(project_id, relative_path).await
    }

    pub async fn structure(&self, project_id: &str) -> Result<ProjectTree, RuntimeError> {
        self.viewer.get_structure(project_id).await
    }

    pub async fn invalidate(&self, project_id: &str) -> Result<bool, RuntimeError> {
        self.viewer.invalidate(project_id).await
    }

    /// Records a new archive for the project and drops the stale extraction.
    /// A running deployment keeps serving the previous code until redeployed.
    pub async fn resubmit(&self, project_id: &str, archive_ref: &str) -> Result<(), RuntimeError> {
        if !self.store.set_archive_ref(project_id, archive_ref)? {
            return Err(RuntimeError::not_found("Project", project_id));
        }
        self.viewer.invalidate(project_id).await?;
        log::info!("Project {} resubmitted as {}", project_id, archive_ref);
        Ok(())
    }

    /// Releases everything the Core holds for a deleted project.
    pub async fn project_deleted(&self, project_id: &str) -> Result<(), RuntimeError> {
        self.deployments.release(project_id).await?;
        self.viewer.invalidate(project_id).await?;
        log::info!("Released resources of deleted project {}", project_id);
        Ok(())
    }

    pub fn deployments(&self) -> &Arc<DeploymentEngine> {
        &self.deployments
    }

    pub fn viewer(&self) -> &Arc<ViewerCache> {
        &self.viewer
    }

    pub fn reaper(&self) -> &Arc<IdleReaper> {
        &self.reaper
    }

    pub fn scheduler(&self) -> &ReaperScheduler {
        &self.scheduler
    }
}
