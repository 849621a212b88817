//! Image acquisition: download a posting image into the run's staging area.
//!
//! A reqwest client with a timeout, a status check before the body is read,
//! and a `tokio::fs::write` into a directory the run owns. The bytes land at
//! a path derived only from the identifier, so the transformer can find them
//! again without being told where they went.

use crate::error::EntryError;
use crate::pipeline::staging::StagingArea;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

/// Fetches an image and stages it under an identifier.
#[async_trait]
pub trait ImageAcquirer: Send + Sync {
    /// Download `url` and store the bytes at `staging.path_for(id)`.
    ///
    /// A second acquisition with the same `id` overwrites the first.
    async fn acquire(
        &self,
        url: &str,
        staging: &StagingArea,
        id: &str,
    ) -> Result<PathBuf, EntryError>;
}

/// Plain HTTP GET acquirer.
#[derive(Debug, Clone)]
pub struct HttpAcquirer {
    client: reqwest::Client,
    timeout_secs: u64,
}

impl HttpAcquirer {
    /// Build a client whose every request times out after `timeout_secs`.
    pub fn new(timeout_secs: u64) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            timeout_secs,
        })
    }
}

#[async_trait]
impl ImageAcquirer for HttpAcquirer {
    async fn acquire(
        &self,
        url: &str,
        staging: &StagingArea,
        id: &str,
    ) -> Result<PathBuf, EntryError> {
        if !is_http_url(url) {
            return Err(fetch_error(url, "not an HTTP/HTTPS URL"));
        }
        info!("Fetching image for {}: {}", id, url);

        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                fetch_error(url, format!("timed out after {}s", self.timeout_secs))
            } else {
                fetch_error(url, e)
            }
        })?;

        if !response.status().is_success() {
            return Err(fetch_error(url, format!("HTTP {}", response.status())));
        }

        let bytes = response.bytes().await.map_err(|e| fetch_error(url, e))?;
        if bytes.is_empty() {
            return Err(fetch_error(url, "response carried no payload"));
        }

        staging
            .ensure_dir()
            .await
            .map_err(|e| fetch_error(url, format!("cannot create staging directory: {e}")))?;

        let path = staging.path_for(id);
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| fetch_error(url, format!("failed to stage image: {e}")))?;

        debug!("Staged {} bytes at {}", bytes.len(), path.display());
        Ok(path)
    }
}

/// Check if the location looks like a fetchable URL.
pub fn is_http_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

fn fetch_error(url: &str, reason: impl std::fmt::Display) -> EntryError {
    EntryError::Fetch {
        url: url.to_string(),
        reason: reason.to_string(),
    }
}
