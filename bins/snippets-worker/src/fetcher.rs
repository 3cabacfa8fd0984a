// Asset Fetcher: downloads the shared file into the job directory

use crate::error::FetchError;
use async_trait::async_trait;
use futures_util::stream::StreamExt;
use snippets_common::types::{Credential, DownloadLocator};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait]
pub trait AssetFetcher: Send + Sync {
    /// Download `locator` to `destination`. No retries; a failure fails the job.
    async fn fetch(
        &self,
        locator: &DownloadLocator,
        credential: &Credential,
        destination: &Path,
    ) -> Result<PathBuf, FetchError>;
}

/// Authenticated HTTP(S) fetcher that streams the body to disk
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self { client })
    }
}

/// Stream the response body chunk by chunk; snippet sizes are not bounded upstream
async fn write_body(response: reqwest::Response, destination: &Path) -> Result<u64, FetchError> {
    let io_error = |source| FetchError::Io {
        path: destination.to_path_buf(),
        source,
    };

    let mut file = File::create(destination).await.map_err(io_error)?;
    let mut stream = response.bytes_stream();
    let mut written = 0u64;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await.map_err(io_error)?;
        written += chunk.len() as u64;
    }

    file.flush().await.map_err(io_error)?;
    Ok(written)
}

#[async_trait]
impl AssetFetcher for HttpFetcher {
    async fn fetch(
        &self,
        locator: &DownloadLocator,
        credential: &Credential,
        destination: &Path,
    ) -> Result<PathBuf, FetchError> {
        let response = self
            .client
            .get(locator.url())
            .bearer_auth(credential.expose())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }

        match write_body(response, destination).await {
            Ok(bytes) => {
                debug!(host = %locator.host, bytes, "Snippet downloaded");
                Ok(destination.to_path_buf())
            }
            Err(e) => {
                // A partial file must never reach the sandbox
                if let Err(remove_err) = tokio::fs::remove_file(destination).await {
                    warn!(error = %remove_err, "Failed to remove partial download");
                }
                Err(e)
            }
        }
    }
}
