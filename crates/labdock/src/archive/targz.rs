use std::path::Path;

use flate2::read::GzDecoder;
use tar::Archive;

use super::{create_parent, safe_relative, ArchiveExtractor, ArchiveFormat, ExtractError, ExtractSummary};

pub struct TarGzExtractor;

fn corrupt(reason: impl std::fmt::Display) -> ExtractError {
    ExtractError::Corrupt {
        format: ArchiveFormat::TarGz,
        reason: reason.to_string(),
    }
}

impl ArchiveExtractor for TarGzExtractor {
    fn extract(&self, bytes: &[u8], target: &Path) -> Result<ExtractSummary, ExtractError> {
        let mut archive = Archive::new(GzDecoder::new(bytes));
        let entries = archive.entries().map_err(corrupt)?;

        let mut summary = ExtractSummary::default();

        for entry_result in entries {
            let mut entry = entry_result.map_err(corrupt)?;
            let entry_type = entry.header().entry_type();
            let raw_path = entry.path().map_err(corrupt)?.into_owned();

            let relative = match safe_relative(&raw_path) {
                Some(path) => path,
                None => {
                    if !entry_type.is_dir() {
                        log::warn!("Skipping tar entry with unsafe path: {}", raw_path.display());
                        summary.skipped += 1;
                    }
                    continue;
                }
            };
            let out_path = target.join(&relative);

            if entry_type.is_dir() {
                std::fs::create_dir_all(&out_path).map_err(|e| ExtractError::Io {
                    path: out_path.clone(),
                    source: e,
                })?;
                summary.directories += 1;
            } else if entry_type.is_file() {
                create_parent(&out_path)?;
                let size = entry.size();
                entry.unpack(&out_path).map_err(|e| {
                    if e.kind() == std::io::ErrorKind::UnexpectedEof
                        || e.kind() == std::io::ErrorKind::InvalidData
                    {
                        corrupt(format!("{}: {}", relative.display(), e))
                    } else {
                        ExtractError::Io {
                            path: out_path.clone(),
                            source: e,
                        }
                    }
                })?;
                summary.files += 1;
                summary.bytes += size;
            } else {
                // Links, devices and fifos never make it into a project tree.
                log::warn!(
                    "Skipping tar entry {} of type {:?}",
                    raw_path.display(),
                    entry_type
                );
                summary.skipped += 1;
            }
        }

        Ok(summary)
    }

    fn supports(&self, format: ArchiveFormat) -> bool {
        matches!(format, ArchiveFormat::TarGz)
    }
}
