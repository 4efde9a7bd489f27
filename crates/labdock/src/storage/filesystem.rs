use std::path::PathBuf;

use async_trait::async_trait;

use super::ObjectStore;
use crate::error::StorageError;
use crate::sandbox;

/// Object store backed by a local directory; references are relative paths
/// under `root`.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn fetch(&self, reference: &str) -> Result<Vec<u8>, StorageError> {
        let path = sandbox::resolve(&self.root, reference).map_err(|source| {
            StorageError::InvalidReference {
                reference: reference.to_string(),
                source,
            }
        })?;

        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound {
                reference: reference.to_string(),
            }),
            Err(e) => Err(StorageError::ReadFile { path, source: e }),
        }
    }
}
