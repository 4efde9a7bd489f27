//! Archive extraction for submitted projects.
//!
//! Extraction is synchronous; async callers wrap [`extract`] in
//! `spawn_blocking` (see [`extract_blocking`]).

pub mod rar;
pub mod targz;
pub mod zip;

use std::path::{Component, Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Unsupported archive format: {0}")]
    UnsupportedFormat(String),

    #[error("Corrupt {format} archive: {reason}")]
    Corrupt {
        format: ArchiveFormat,
        reason: String,
    },

    #[error("Failed to write '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Archive tool '{program}' is unavailable: {reason}")]
    ToolUnavailable { program: String, reason: String },

    #[error("Extraction task failed: {0}")]
    Task(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveFormat {
    Zip,
    TarGz,
    Rar,
}

impl std::fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ArchiveFormat::Zip => "zip",
            ArchiveFormat::TarGz => "tar.gz",
            ArchiveFormat::Rar => "rar",
        };
        f.write_str(name)
    }
}

impl ArchiveFormat {
    /// Detects the format from the leading magic bytes.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(b"PK\x03\x04") || bytes.starts_with(b"PK\x05\x06") {
            Some(ArchiveFormat::Zip)
        } else if bytes.starts_with(&[0x1f, 0x8b]) {
            Some(ArchiveFormat::TarGz)
        } else if bytes.starts_with(b"Rar!\x1a\x07") {
            Some(ArchiveFormat::Rar)
        } else {
            None
        }
    }

    /// Maps an archive reference or filename to a format by extension.
    pub fn from_filename(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".zip") {
            Some(ArchiveFormat::Zip)
        } else if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Some(ArchiveFormat::TarGz)
        } else if lower.ends_with(".rar") {
            Some(ArchiveFormat::Rar)
        } else {
            None
        }
    }

    /// Resolves the format of a fetched archive, preferring the content
    /// signature over the reference's extension.
    pub fn detect(bytes: &[u8], reference: &str) -> Result<Self, ExtractError> {
        Self::sniff(bytes)
            .or_else(|| Self::from_filename(reference))
            .ok_or_else(|| ExtractError::UnsupportedFormat(reference.to_string()))
    }
}

/// Counts of what an extraction wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExtractSummary {
    pub files: usize,
    pub directories: usize,
    pub bytes: u64,
    pub skipped: usize,
}

pub trait ArchiveExtractor: Send + Sync {
    fn extract(&self, bytes: &[u8], target: &Path) -> Result<ExtractSummary, ExtractError>;
    fn supports(&self, format: ArchiveFormat) -> bool;
}

/// Extracts `bytes` in the given format into `target`, creating it if needed.
///
/// Nothing is written for unsupported formats.
pub fn extract(
    bytes: &[u8],
    format: ArchiveFormat,
    target: &Path,
) -> Result<ExtractSummary, ExtractError> {
    let rar = rar::RarExtractor::from_env();
    let extractors: [&dyn ArchiveExtractor; 3] = [&zip::ZipExtractor, &targz::TarGzExtractor, &rar];

    let extractor = extractors
        .into_iter()
        .find(|e| e.supports(format))
        .ok_or_else(|| ExtractError::UnsupportedFormat(format.to_string()))?;

    std::fs::create_dir_all(target).map_err(|e| ExtractError::Io {
        path: target.to_path_buf(),
        source: e,
    })?;

    let summary = extractor.extract(bytes, target)?;
    log::debug!(
        "Extracted {} archive: {} files, {} directories, {} bytes ({} entries skipped)",
        format,
        summary.files,
        summary.directories,
        summary.bytes,
        summary.skipped
    );
    Ok(summary)
}

/// Runs [`extract`] on the blocking thread pool.
pub async fn extract_blocking(
    bytes: Vec<u8>,
    format: ArchiveFormat,
    target: PathBuf,
) -> Result<ExtractSummary, ExtractError> {
    tokio::task::spawn_blocking(move || extract(&bytes, format, &target))
        .await
        .map_err(|e| ExtractError::Task(e.to_string()))?
}

/// Returns the entry path as a relative path made only of normal components,
/// or `None` when joining it to the target could escape.
pub(crate) fn safe_relative(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if out.as_os_str().is_empty() {
        None
    } else {
        Some(out)
    }
}

pub(crate) fn create_parent(path: &Path) -> Result<(), ExtractError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ExtractError::Io {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    Ok(())
}
