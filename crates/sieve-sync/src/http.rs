use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::Client;

use crate::adapter::SourceFetcher;
use crate::error::FetchError;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Fetches filter lists over HTTP(S). `file://` URLs are read from disk so
/// bundled lists can share the same configuration.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, FetchError> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("sieve/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl SourceFetcher for HttpFetcher {
    async fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        if let Some(path) = url.strip_prefix("file://") {
            debug!("reading {}", path);
            return Ok(tokio::fs::read_to_string(path).await?);
        }

        debug!("fetching {}", url);
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response.text().await?)
    }
}
