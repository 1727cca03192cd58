//! URL-fetch collaborator for remote-sourced inputs.
//!
//! `fetch(url) -> media bytes | failure`. Fetch failures split into
//! permanent (the URL can never yield media) and transient (worth a
//! retry), which the scheduler maps onto its error taxonomy.

use async_trait::async_trait;

/// Fetch failure classification.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The URL is unusable: malformed, 4xx, or not media.
    #[error("unusable source url: {0}")]
    Permanent(String),

    /// Network or upstream failure that may succeed on retry.
    #[error("transient fetch failure: {0}")]
    Transient(String),
}

/// Resolves a remote URL into local media bytes.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// HTTP(S) fetcher backed by reqwest.
pub struct HttpMediaFetcher {
    client: reqwest::Client,
}

impl HttpMediaFetcher {
    pub fn new(timeout: std::time::Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Permanent(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl MediaFetcher for HttpMediaFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() || e.is_connect() {
                FetchError::Transient(e.to_string())
            } else {
                FetchError::Permanent(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_client_error() {
            return Err(FetchError::Permanent(format!(
                "source responded {status} for {url}"
            )));
        }
        if !status.is_success() {
            return Err(FetchError::Transient(format!(
                "source responded {status} for {url}"
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| FetchError::Transient(e.to_string()))?;
        if bytes.is_empty() {
            return Err(FetchError::Permanent(format!("empty body from {url}")));
        }
        tracing::debug!(url, len = bytes.len(), "Fetched remote media");
        Ok(bytes.to_vec())
    }
}
