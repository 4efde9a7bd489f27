//! On-disk staging area of one deployment.
//!
//! ```text
//! <workspace_root>/<slug>/
//!     code/                 extracted submission
//!     docker-compose.yml    generated manifest
//!     deploy.log            append-only step log
//! ```

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};

use crate::engine::MANIFEST_FILE;
use crate::error::RuntimeError;

pub const CODE_DIR: &str = "code";
pub const DEPLOY_LOG: &str = "deploy.log";

/// Root entries that do not count when looking for a single wrapper folder.
const METADATA_ENTRIES: &[&str] = &["__MACOSX"];

#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(workspace_root: &Path, slug: &str) -> Self {
        Self {
            root: workspace_root.join(slug),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn code_dir(&self) -> PathBuf {
        self.root.join(CODE_DIR)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    pub fn log(&self) -> DeployLog {
        DeployLog {
            path: self.root.join(DEPLOY_LOG),
        }
    }

    pub fn exists(&self) -> bool {
        self.root.is_dir()
    }

    /// Deletes any previous contents and creates an empty `code/` directory.
    pub async fn recreate(&self) -> Result<(), RuntimeError> {
        self.remove().await?;
        tokio::fs::create_dir_all(self.code_dir())
            .await
            .map_err(|e| RuntimeError::io(self.code_dir(), e))
    }

    /// Removes the workspace; a missing directory is fine.
    pub async fn remove(&self) -> Result<(), RuntimeError> {
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RuntimeError::io(&self.root, e)),
        }
    }

    pub async fn write_manifest(&self, yaml: &str) -> Result<(), RuntimeError> {
        let path = self.manifest_path();
        tokio::fs::write(&path, yaml)
            .await
            .map_err(|e| RuntimeError::io(path, e))
    }
}

/// Append-only, timestamped deploy log.
#[derive(Debug, Clone)]
pub struct DeployLog {
    path: PathBuf,
}

impl DeployLog {
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, text: &str) -> Result<(), RuntimeError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| RuntimeError::io(&self.path, e))?;
        file.write_all(text.as_bytes())
            .map_err(|e| RuntimeError::io(&self.path, e))
    }

    /// Appends one `[<rfc3339>] message` line.
    pub fn line(&self, message: &str) -> Result<(), RuntimeError> {
        let stamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        self.append(&format!("[{}] {}\n", stamp, message))
    }

    /// Appends a labelled block of captured process output.
    pub fn block(&self, label: &str, content: &str) -> Result<(), RuntimeError> {
        if content.trim().is_empty() {
            return self.line(&format!("{}: (empty)", label));
        }
        let mut text = format!("----- {} -----\n{}", label, content);
        if !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&format!("----- end {} -----\n", label));
        self.line(&format!("{}:", label))?;
        self.append(&text)
    }

    /// Like [`DeployLog::line`], for paths where a log failure must not mask
    /// the original error.
    pub fn line_best_effort(&self, message: &str) {
        if let Err(e) = self.line(message) {
            log::warn!("Failed to append to deploy log: {}", e);
        }
    }

    pub fn read(&self) -> Option<String> {
        std::fs::read(&self.path)
            .ok()
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn len(&self) -> u64 {
        std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn is_ignored(name: &str) -> bool {
    name.starts_with('.') || METADATA_ENTRIES.contains(&name)
}

/// Hoists the contents of a lone top-level directory into `code_dir`.
///
/// Hidden and metadata entries are ignored when deciding whether the
/// directory is alone. Returns the hoisted directory's name.
pub fn flatten_single_wrapper(code_dir: &Path) -> Result<Option<String>, RuntimeError> {
    let entries = std::fs::read_dir(code_dir).map_err(|e| RuntimeError::io(code_dir, e))?;

    let mut visible = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| RuntimeError::io(code_dir, e))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !is_ignored(&name) {
            visible.push(entry);
        }
    }

    if visible.len() != 1 {
        return Ok(None);
    }
    let wrapper = &visible[0];
    let is_dir = wrapper
        .file_type()
        .map_err(|e| RuntimeError::io(wrapper.path(), e))?
        .is_dir();
    if !is_dir {
        return Ok(None);
    }
    let wrapper_name = wrapper.file_name().to_string_lossy().into_owned();

    // Move the wrapper aside first so a child with the same name can take its place.
    let staging = code_dir.join(format!(".labdock-flatten-{}", uuid::Uuid::new_v4()));
    std::fs::rename(wrapper.path(), &staging).map_err(|e| RuntimeError::io(wrapper.path(), e))?;

    let children = std::fs::read_dir(&staging).map_err(|e| RuntimeError::io(&staging, e))?;
    for child in children {
        let child = child.map_err(|e| RuntimeError::io(&staging, e))?;
        let target = code_dir.join(child.file_name());
        if target.exists() {
            // Only ignored root entries can clash; the wrapper's copy wins.
            remove_path(&target)?;
        }
        std::fs::rename(child.path(), &target).map_err(|e| RuntimeError::io(child.path(), e))?;
    }
    std::fs::remove_dir(&staging).map_err(|e| RuntimeError::io(&staging, e))?;

    Ok(Some(wrapper_name))
}

fn remove_path(path: &Path) -> Result<(), RuntimeError> {
    let result = if path.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };
    result.map_err(|e| RuntimeError::io(path, e))
}
