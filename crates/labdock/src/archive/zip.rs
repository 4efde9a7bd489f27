use std::io::Cursor;
use std::path::Path;

use super::{create_parent, safe_relative, ArchiveExtractor, ArchiveFormat, ExtractError, ExtractSummary};

const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;

pub struct ZipExtractor;

impl ArchiveExtractor for ZipExtractor {
    fn extract(&self, bytes: &[u8], target: &Path) -> Result<ExtractSummary, ExtractError> {
        let mut archive =
            ::zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| ExtractError::Corrupt {
                format: ArchiveFormat::Zip,
                reason: e.to_string(),
            })?;

        let mut summary = ExtractSummary::default();

        for i in 0..archive.len() {
            let mut file = archive.by_index(i).map_err(|e| ExtractError::Corrupt {
                format: ArchiveFormat::Zip,
                reason: format!("entry {}: {}", i, e),
            })?;

            let relative = match file.enclosed_name().as_deref().and_then(safe_relative) {
                Some(path) => path,
                None => {
                    log::warn!("Skipping zip entry with unsafe path: {}", file.name());
                    summary.skipped += 1;
                    continue;
                }
            };

            if file
                .unix_mode()
                .is_some_and(|mode| mode & S_IFMT == S_IFLNK)
            {
                log::warn!("Skipping symlink entry: {}", file.name());
                summary.skipped += 1;
                continue;
            }

            let out_path = target.join(&relative);

            if file.is_dir() {
                std::fs::create_dir_all(&out_path).map_err(|e| ExtractError::Io {
                    path: out_path.clone(),
                    source: e,
                })?;
                summary.directories += 1;
                continue;
            }

            create_parent(&out_path)?;
            let mut out_file = std::fs::File::create(&out_path).map_err(|e| ExtractError::Io {
                path: out_path.clone(),
                source: e,
            })?;
            let written = std::io::copy(&mut file, &mut out_file).map_err(|e| {
                // Decompression failures come through the reader side of the copy.
                if e.kind() == std::io::ErrorKind::InvalidData {
                    ExtractError::Corrupt {
                        format: ArchiveFormat::Zip,
                        reason: format!("{}: {}", relative.display(), e),
                    }
                } else {
                    ExtractError::Io {
                        path: out_path.clone(),
                        source: e,
                    }
                }
            })?;

            summary.files += 1;
            summary.bytes += written;
        }

        Ok(summary)
    }

    fn supports(&self, format: ArchiveFormat) -> bool {
        matches!(format, ArchiveFormat::Zip)
    }
}
