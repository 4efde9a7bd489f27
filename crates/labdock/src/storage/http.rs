use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use super::ObjectStore;
use crate::error::StorageError;

/// Object store reached over HTTP: `GET <base_url>/<reference>`.
pub struct HttpObjectStore {
    client: reqwest::Client,
    base_url: String,
    token: Option<SecretString>,
}

impl HttpObjectStore {
    pub fn new(
        base_url: String,
        token: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, StorageError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    pub fn url_for(&self, reference: &str) -> String {
        format!("{}/{}", self.base_url, reference.trim_start_matches('/'))
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn fetch(&self, reference: &str) -> Result<Vec<u8>, StorageError> {
        let mut request = self.client.get(self.url_for(reference));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request.send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(StorageError::NotFound {
                reference: reference.to_string(),
            });
        }
        if !status.is_success() {
            return Err(StorageError::HttpStatus {
                reference: reference.to_string(),
                status: status.as_u16(),
            });
        }

        let bytes = response.bytes().await?;
        log::debug!("Fetched archive '{}' ({} bytes)", reference, bytes.len());
        Ok(bytes.to_vec())
    }
}
