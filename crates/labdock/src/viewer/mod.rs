//! Viewer cache: read-only browsing of submitted archives.
//!
//! One extraction per project under `<cache_root>/<slug>/`, tracked with its
//! last access time. Extraction and invalidation are serialised per project;
//! reads of an extracted project only refresh the access time.
//!
//! Access times live in memory. After a restart, [`ViewerCache::sweep_idle`]
//! falls back to directory modification times for untracked extractions.

pub mod tree;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};

use serde::Serialize;
use tracing::{info_span, Instrument};

use crate::archive::{self, ArchiveFormat};
use crate::config::RuntimeConfig;
use crate::deploy::ProjectLocks;
use crate::error::RuntimeError;
use crate::manifest::ProjectNames;
use crate::project::ProjectStore;
use crate::sandbox;
use crate::storage::{self, ObjectStore};

pub use tree::{NodeKind, ProjectTree, TreeNode};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub project_id: String,
    pub dir: PathBuf,
    pub last_access: SystemTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileContent {
    pub content: Vec<u8>,
    /// MIME type guessed from the extension.
    pub mime: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheSweepReport {
    pub evicted: usize,
    pub orphans_removed: usize,
}

pub struct ViewerCache {
    cache_root: PathBuf,
    store: Arc<dyn ProjectStore>,
    objects: Arc<dyn ObjectStore>,
    fetch_timeout: Duration,
    locks: ProjectLocks,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl ViewerCache {
    pub fn new(
        cache_root: PathBuf,
        store: Arc<dyn ProjectStore>,
        objects: Arc<dyn ObjectStore>,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            cache_root,
            store,
            objects,
            fetch_timeout,
            locks: ProjectLocks::new(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(
        config: &RuntimeConfig,
        store: Arc<dyn ProjectStore>,
        objects: Arc<dyn ObjectStore>,
    ) -> Self {
        Self::new(
            config.cache_root.clone(),
            store,
            objects,
            Duration::from_secs(config.object_store.timeout_secs()),
        )
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns the tracked entry, refreshing its access time.
    fn touch(&self, project_id: &str) -> Option<CacheEntry> {
        let mut entries = self.entries();
        let entry = entries.get_mut(project_id)?;
        if !entry.dir.is_dir() {
            entries.remove(project_id);
            return None;
        }
        entry.last_access = SystemTime::now();
        Some(entry.clone())
    }

    pub fn is_cached(&self, project_id: &str) -> bool {
        self.entries().contains_key(project_id)
    }

    fn project_dir(&self, project_id: &str) -> Result<PathBuf, RuntimeError> {
        let names = ProjectNames::derive(project_id)?;
        Ok(self.cache_root.join(names.slug))
    }

    /// Extracts the project's archive unless an extraction is already cached.
    pub async fn ensure_extracted(&self, project_id: &str) -> Result<CacheEntry, RuntimeError> {
        if let Some(entry) = self.touch(project_id) {
            return Ok(entry);
        }

        let _guard = self.locks.lock(project_id).await;
        if let Some(entry) = self.touch(project_id) {
            return Ok(entry);
        }

        let project = self
            .store
            .find_project(project_id)?
            .ok_or_else(|| RuntimeError::not_found("Project", project_id))?;
        let archive_ref = project.archive().ok_or_else(|| {
            RuntimeError::Configuration(format!("Project '{}' has no uploaded archive", project_id))
        })?;
        let dir = self.project_dir(project_id)?;

        async {
            let bytes =
                storage::fetch_with_timeout(self.objects.as_ref(), archive_ref, self.fetch_timeout)
                    .await?;
            let format = ArchiveFormat::detect(&bytes, archive_ref)?;

            remove_dir_if_exists(&dir).await?;
            if let Err(e) = archive::extract_blocking(bytes, format, dir.clone()).await {
                if let Err(cleanup) = remove_dir_if_exists(&dir).await {
                    log::warn!("Failed to clean up partial extraction: {}", cleanup);
                }
                return Err(RuntimeError::from(e));
            }
            Ok::<(), RuntimeError>(())
        }
        .instrument(info_span!("viewer_extract", project = %project_id))
        .await?;

        let entry = CacheEntry {
            project_id: project_id.to_string(),
            dir,
            last_access: SystemTime::now(),
        };
        self.entries()
            .insert(project_id.to_string(), entry.clone());
        log::info!("Extracted project {} for viewing", project_id);
        Ok(entry)
    }

    pub async fn get_file_content(
        &self,
        project_id: &str,
        relative_path: &str,
    ) -> Result<FileContent, RuntimeError> {
        let entry = self.ensure_extracted(project_id).await?;
        let path = sandbox::resolve(&entry.dir, relative_path)?;

        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Err(RuntimeError::not_found("File", relative_path)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RuntimeError::not_found("File", relative_path))
            }
            Err(e) => return Err(RuntimeError::io(path, e)),
        }

        let content = tokio::fs::read(&path)
            .await
            .map_err(|e| RuntimeError::io(&path, e))?;
        let mime = mime_guess::from_path(&path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        Ok(FileContent { content, mime })
    }

    /// Ordered tree of the extraction. Records the total size on the project
    /// the first time it is computed.
    pub async fn get_structure(&self, project_id: &str) -> Result<ProjectTree, RuntimeError> {
        let entry = self.ensure_extracted(project_id).await?;
        let dir = entry.dir.clone();
        let tree = tokio::task::spawn_blocking(move || tree::build_tree(&dir))
            .await
            .map_err(|e| RuntimeError::Io {
                path: entry.dir.clone(),
                source: std::io::Error::other(e.to_string()),
            })??;

        if self.store.backfill_total_size(project_id, tree.total_size)? {
            log::debug!(
                "Recorded total size {} for project {}",
                tree.total_size,
                project_id
            );
        }
        Ok(tree)
    }

    /// Drops the cached extraction. Returns whether anything was cached.
    pub async fn invalidate(&self, project_id: &str) -> Result<bool, RuntimeError> {
        let _guard = self.locks.lock(project_id).await;
        let tracked = self.entries().remove(project_id).is_some();
        let dir = self.project_dir(project_id)?;
        let existed = dir.exists();
        remove_dir_if_exists(&dir).await?;
        if tracked || existed {
            log::info!("Invalidated viewer cache for project {}", project_id);
        }
        Ok(tracked || existed)
    }

    /// Evicts entries idle for at least `threshold`, then removes untracked
    /// extraction directories not modified within it.
    pub async fn sweep_idle(&self, threshold: Duration) -> CacheSweepReport {
        let cutoff = SystemTime::now()
            .checked_sub(threshold)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        self.sweep_idle_before(cutoff).await
    }

    pub async fn sweep_idle_before(&self, cutoff: SystemTime) -> CacheSweepReport {
        let mut report = CacheSweepReport::default();

        let stale: Vec<String> = self
            .entries()
            .values()
            .filter(|e| e.last_access <= cutoff)
            .map(|e| e.project_id.clone())
            .collect();

        for project_id in stale {
            let Some(_guard) = self.locks.try_lock(&project_id) else {
                continue;
            };
            let removed = {
                let mut entries = self.entries();
                match entries.get(&project_id) {
                    Some(entry) if entry.last_access <= cutoff => entries.remove(&project_id),
                    _ => None,
                }
            };
            if let Some(entry) = removed {
                match remove_dir_if_exists(&entry.dir).await {
                    Ok(()) => report.evicted += 1,
                    Err(e) => log::warn!("Failed to evict cache for {}: {}", project_id, e),
                }
            }
        }

        let tracked: HashSet<PathBuf> = self.entries().values().map(|e| e.dir.clone()).collect();
        match std::fs::read_dir(&self.cache_root) {
            Ok(dirs) => {
                for dir in dirs.filter_map(|d| d.ok()) {
                    let path = dir.path();
                    if !path.is_dir() || tracked.contains(&path) {
                        continue;
                    }
                    let modified = dir.metadata().and_then(|m| m.modified()).ok();
                    if modified.map(|m| m <= cutoff).unwrap_or(false) {
                        match remove_dir_if_exists(&path).await {
                            Ok(()) => report.orphans_removed += 1,
                            Err(e) => log::warn!("Failed to remove orphaned cache dir: {}", e),
                        }
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Failed to scan cache root: {}", e),
        }

        if report.evicted > 0 || report.orphans_removed > 0 {
            log::info!(
                "Cache sweep evicted {} entries, removed {} orphaned directories",
                report.evicted,
                report.orphans_removed
            );
        }
        report
    }
}

async fn remove_dir_if_exists(dir: &Path) -> Result<(), RuntimeError> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(RuntimeError::io(dir, e)),
    }
}
