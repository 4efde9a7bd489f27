//! Rar extraction through an external extractor.
//!
//! The rar format has no pure Rust decoder, so the archive is handed to
//! `bsdtar` (libarchive) or `unrar` in a private staging directory. Only
//! regular files and directories with safe relative paths are copied from the
//! staging area into the target; links never leave it.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

use walkdir::WalkDir;

use super::{create_parent, safe_relative, ArchiveExtractor, ArchiveFormat, ExtractError, ExtractSummary};

/// Overrides the extractor program (`bsdtar`, `unrar` or a full path to either).
pub const RAR_TOOL_ENV_VAR: &str = "LABDOCK_RAR_TOOL";

const DEFAULT_RAR_TOOL: &str = "bsdtar";

pub struct RarExtractor {
    program: String,
}

fn corrupt(reason: impl std::fmt::Display) -> ExtractError {
    ExtractError::Corrupt {
        format: ArchiveFormat::Rar,
        reason: reason.to_string(),
    }
}

/// Scratch directory removed on drop.
struct Staging(PathBuf);

impl Drop for Staging {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.0) {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!("Failed to remove staging dir {}: {}", self.0.display(), e);
            }
        }
    }
}

impl RarExtractor {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn from_env() -> Self {
        let program = std::env::var(RAR_TOOL_ENV_VAR)
            .ok()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_RAR_TOOL.to_string());
        Self::new(program)
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn is_unrar(&self) -> bool {
        Path::new(&self.program)
            .file_stem()
            .is_some_and(|stem| stem.eq_ignore_ascii_case("unrar"))
    }

    fn args(&self, archive: &Path, dest: &Path) -> Vec<OsString> {
        if self.is_unrar() {
            // unrar wants a trailing separator on the destination
            let mut dest = dest.as_os_str().to_os_string();
            dest.push(std::path::MAIN_SEPARATOR_STR);
            vec!["x".into(), "-o+".into(), "-y".into(), "-idq".into(), archive.into(), dest]
        } else {
            vec!["-x".into(), "-f".into(), archive.into(), "-C".into(), dest.into()]
        }
    }

    fn unpack(&self, archive: &Path, dest: &Path) -> Result<(), ExtractError> {
        let output = Command::new(&self.program)
            .args(self.args(archive, dest))
            .output()
            .map_err(|e| ExtractError::ToolUnavailable {
                program: self.program.clone(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let reason = match stderr.trim() {
                "" => format!("{} exited with {}", self.program, output.status),
                message => message.to_string(),
            };
            return Err(corrupt(reason));
        }
        Ok(())
    }
}

impl ArchiveExtractor for RarExtractor {
    fn extract(&self, bytes: &[u8], target: &Path) -> Result<ExtractSummary, ExtractError> {
        let staging = Staging(std::env::temp_dir().join(format!("labdock_rar_{}", uuid::Uuid::new_v4())));
        let unpacked = staging.0.join("out");
        std::fs::create_dir_all(&unpacked).map_err(|e| ExtractError::Io {
            path: unpacked.clone(),
            source: e,
        })?;

        let archive_path = staging.0.join("upload.rar");
        std::fs::write(&archive_path, bytes).map_err(|e| ExtractError::Io {
            path: archive_path.clone(),
            source: e,
        })?;

        self.unpack(&archive_path, &unpacked)?;
        adopt(&unpacked, target)
    }

    fn supports(&self, format: ArchiveFormat) -> bool {
        matches!(format, ArchiveFormat::Rar)
    }
}

/// Copies the unpacked tree into `target`, skipping links and anything whose
/// relative path is not made of plain components.
pub(crate) fn adopt(unpacked: &Path, target: &Path) -> Result<ExtractSummary, ExtractError> {
    let mut summary = ExtractSummary::default();

    for entry in WalkDir::new(unpacked).min_depth(1).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(|e| ExtractError::Io {
            path: e.path().unwrap_or(unpacked).to_path_buf(),
            source: e.into(),
        })?;
        let relative = match entry.path().strip_prefix(unpacked).ok().and_then(safe_relative) {
            Some(path) => path,
            None => {
                log::warn!("Skipping rar entry with unsafe path: {}", entry.path().display());
                summary.skipped += 1;
                continue;
            }
        };
        let out_path = target.join(&relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            std::fs::create_dir_all(&out_path).map_err(|e| ExtractError::Io {
                path: out_path.clone(),
                source: e,
            })?;
            summary.directories += 1;
        } else if file_type.is_file() {
            create_parent(&out_path)?;
            let copied = std::fs::copy(entry.path(), &out_path).map_err(|e| ExtractError::Io {
                path: out_path.clone(),
                source: e,
            })?;
            summary.files += 1;
            summary.bytes += copied;
        } else {
            log::warn!("Skipping rar entry {} (not a regular file)", relative.display());
            summary.skipped += 1;
        }
    }

    Ok(summary)
}
