//! Object store access for submitted archives.
//!
//! Archive references are opaque keys produced at upload time. The core only
//! ever fetches them.

pub mod filesystem;
pub mod http;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::ObjectStoreConfig;
use crate::error::{RuntimeError, StorageError};

pub use filesystem::FsObjectStore;
pub use http::HttpObjectStore;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn fetch(&self, reference: &str) -> Result<Vec<u8>, StorageError>;
}

/// Builds the configured object store.
pub fn from_config(config: &ObjectStoreConfig) -> Result<Arc<dyn ObjectStore>, StorageError> {
    match config {
        ObjectStoreConfig::Fs { root } => Ok(Arc::new(FsObjectStore::new(root.clone()))),
        ObjectStoreConfig::Http {
            base_url,
            token_file,
            token_env,
            timeout_secs,
        } => {
            let token =
                crate::secrets::resolve_secret_optional(token_file.as_deref(), token_env.as_deref())?;
            Ok(Arc::new(HttpObjectStore::new(
                base_url.clone(),
                token,
                Duration::from_secs(*timeout_secs),
            )?))
        }
    }
}

/// Fetches an archive, bounded by `timeout`.
pub async fn fetch_with_timeout(
    store: &dyn ObjectStore,
    reference: &str,
    timeout: Duration,
) -> Result<Vec<u8>, RuntimeError> {
    match tokio::time::timeout(timeout, store.fetch(reference)).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(RuntimeError::Timeout {
            operation: "Archive fetch".to_string(),
            after: timeout,
        }),
    }
}
