//! HTTP content store
//!
//! Resolves store paths against a base URL and fetches them with reqwest.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::content::ContentStore;
use crate::error::{Error, Result};

/// Default request timeout
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Content store backed by an HTTP(S) origin
#[derive(Clone)]
pub struct HttpContentStore {
    client: Client,
    base_url: String,
}

impl HttpContentStore {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    /// Full URL for a store path
    pub fn url_for(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    async fn get(&self, path: &str) -> Result<reqwest::Response> {
        let url = self.url_for(path);
        debug!(url = %url, "Fetching");

        let response = self.client.get(&url).send().await.map_err(|e| Error::Fetch {
            path: path.to_string(),
            reason: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpStatus {
                path: path.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl ContentStore for HttpContentStore {
    async fn fetch_bytes(&self, path: &str) -> Result<Vec<u8>> {
        let response = self.get(path).await?;
        let bytes = response.bytes().await.map_err(|e| Error::Fetch {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        Ok(bytes.to_vec())
    }

    async fn fetch_text(&self, path: &str) -> Result<String> {
        let response = self.get(path).await?;
        response.text().await.map_err(|e| Error::Fetch {
            path: path.to_string(),
            reason: e.to_string(),
        })
    }
}
