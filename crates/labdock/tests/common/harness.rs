//! Isolated runtime environment for integration tests.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tempfile::TempDir;

use labdock::config::{ObjectStoreConfig, RuntimeConfig};
use labdock::db::project_repo::{self, LabRow, ProjectRow};
use labdock::db::Database;
use labdock::project::format_timestamp;
use labdock::{
    FsObjectStore, ObjectStore, Project, ProjectNames, ProjectStore, RuntimeCore, StorageError,
};

use super::FakeEngine;

pub struct TestHarness {
    temp_dir: TempDir,
    pub uploads: PathBuf,
    pub config: RuntimeConfig,
    pub db: Database,
    pub engine: Arc<FakeEngine>,
    pub core: RuntimeCore,
}

/// Object store that waits before every fetch.
struct SlowObjectStore {
    inner: FsObjectStore,
    delay: Duration,
}

#[async_trait]
impl ObjectStore for SlowObjectStore {
    async fn fetch(&self, reference: &str) -> Result<Vec<u8>, StorageError> {
        tokio::time::sleep(self.delay).await;
        self.inner.fetch(reference).await
    }
}

impl TestHarness {
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Every fetch waits `delay`; fetches are abandoned after `timeout_secs`.
    pub fn with_slow_uploads(delay: Duration, timeout_secs: u64) -> Self {
        Self::build(Some((delay, timeout_secs)))
    }

    fn build(slow: Option<(Duration, u64)>) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base = temp_dir.path();
        let uploads = base.join("uploads");
        std::fs::create_dir_all(&uploads).expect("Failed to create uploads directory");

        // Only the timeout of the configured store is read; fetches go to `objects`.
        let object_store = match slow {
            Some((_, timeout_secs)) => ObjectStoreConfig::Http {
                base_url: "http://uploads.invalid".to_string(),
                token_file: None,
                token_env: None,
                timeout_secs,
            },
            None => ObjectStoreConfig::Fs {
                root: uploads.clone(),
            },
        };
        let config = RuntimeConfig::new(base.join("workspaces"), base.join("cache"), object_store);

        let fs_store = FsObjectStore::new(uploads.clone());
        let objects: Arc<dyn ObjectStore> = match slow {
            Some((delay, _)) => Arc::new(SlowObjectStore {
                inner: fs_store,
                delay,
            }),
            None => Arc::new(fs_store),
        };

        let db = Database::open_in_memory().expect("Failed to open database");
        let engine = Arc::new(FakeEngine::new());
        let core = RuntimeCore::new(&config, Arc::new(db.clone()), objects, engine.clone());

        Self {
            temp_dir,
            uploads,
            config,
            db,
            engine,
            core,
        }
    }

    /// Stores `bytes` in the object store under `reference`.
    pub fn upload(&self, reference: &str, bytes: &[u8]) {
        let path = self.uploads.join(reference);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, bytes).unwrap();
    }

    /// Inserts a stopped project owned by `u1`.
    pub fn seed_project(&self, id: &str, archive_ref: Option<&str>) {
        self.seed_project_in_lab(id, archive_ref, None);
    }

    pub fn seed_project_in_lab(&self, id: &str, archive_ref: Option<&str>, lab_id: Option<&str>) {
        let now = format_timestamp(Utc::now());
        project_repo::insert(
            &self.db,
            &ProjectRow {
                id: id.to_string(),
                owner_id: "u1".to_string(),
                lab_id: lab_id.map(str::to_string),
                archive_ref: archive_ref.map(str::to_string),
                status: "stopped".to_string(),
                created_at: now.clone(),
                updated_at: now,
                ..Default::default()
            },
        )
        .unwrap();
    }

    pub fn seed_lab(&self, id: &str, name: &str, section: &str) {
        project_repo::insert_lab(
            &self.db,
            &LabRow {
                id: id.to_string(),
                name: name.to_string(),
                section: Some(section.to_string()),
                deadline: None,
            },
        )
        .unwrap();
    }

    /// Uploads `bytes` as `<id>.zip` and seeds the project.
    pub fn submit(&self, id: &str, bytes: &[u8]) {
        let reference = format!("{}.zip", id);
        self.upload(&reference, bytes);
        self.seed_project(id, Some(&reference));
    }

    pub fn project(&self, id: &str) -> Project {
        self.db.find_project(id).unwrap().expect("project exists")
    }

    pub fn workspace_dir(&self, id: &str) -> PathBuf {
        let names = ProjectNames::derive(id).unwrap();
        self.config.workspace_root.join(names.slug)
    }

    pub fn cache_dir(&self, id: &str) -> PathBuf {
        let names = ProjectNames::derive(id).unwrap();
        self.config.cache_root.join(names.slug)
    }

    pub fn deploy_log(&self, id: &str) -> String {
        std::fs::read_to_string(self.workspace_dir(id).join("deploy.log")).unwrap_or_default()
    }

    pub fn manifest(&self, id: &str) -> serde_yaml::Value {
        let text =
            std::fs::read_to_string(self.workspace_dir(id).join("docker-compose.yml")).unwrap();
        serde_yaml::from_str(&text).unwrap()
    }

    pub fn base(&self) -> &std::path::Path {
        self.temp_dir.path()
    }
}
