//! Source download stage.
//!
//! Fetches `http(s)://` sources by streaming the body to disk and copies
//! `file://` sources directly. Transient HTTP failures are retried with
//! exponential backoff; anything written by a failed attempt is removed.

use std::path::Path;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::DownloadConfig;
use crate::error::{MediaError, MediaResult};
use crate::fs_utils::ensure_parent;

/// Connection establishment ceiling.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Downloads source references to local files.
#[derive(Debug, Clone)]
pub struct Downloader {
    client: reqwest::Client,
    config: DownloadConfig,
}

impl Downloader {
    /// Create a downloader with its own HTTP client.
    pub fn new(config: DownloadConfig) -> MediaResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self { client, config })
    }

    /// Create a downloader around an existing client.
    pub fn with_client(client: reqwest::Client, config: DownloadConfig) -> Self {
        Self { client, config }
    }

    /// Fetch `url` into `dest`, returning the number of bytes written.
    pub async fn download(&self, url: &str, dest: &Path) -> MediaResult<u64> {
        let parsed = Url::parse(url)
            .map_err(|e| MediaError::network(url, format!("invalid URL: {}", e), false))?;
        ensure_parent(dest).await?;

        match parsed.scheme() {
            "file" => copy_local(url, &parsed, dest).await,
            "http" | "https" => self.fetch_with_retry(url, dest).await,
            other => Err(MediaError::network(
                url,
                format!("unsupported scheme '{}'", other),
                false,
            )),
        }
    }

    async fn fetch_with_retry(&self, url: &str, dest: &Path) -> MediaResult<u64> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.fetch_once(url, dest).await {
                Ok(bytes) => {
                    info!("Downloaded {} bytes from {}", bytes, url);
                    return Ok(bytes);
                }
                Err(e) => {
                    remove_partial(dest).await;

                    if !e.is_retryable() || attempt >= max_attempts {
                        return Err(e);
                    }

                    let delay = self.backoff(attempt);
                    warn!(
                        "Download attempt {}/{} failed: {}. Retrying in {:?}",
                        attempt, max_attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.config.base_delay.saturating_mul(factor)
    }

    async fn fetch_once(&self, url: &str, dest: &Path) -> MediaResult<u64> {
        let idle = self.config.idle_timeout;

        let response = match tokio::time::timeout(idle, self.client.get(url).send()).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(MediaError::network(url, e.to_string(), !e.is_builder())),
            Err(_) => {
                return Err(MediaError::network(
                    url,
                    format!("no response within {}s", idle.as_secs_f64()),
                    true,
                ))
            }
        };

        let status = response.status();
        if !status.is_success() {
            let retryable = status.is_server_error() || status.as_u16() == 429;
            return Err(MediaError::network(url, format!("HTTP {}", status), retryable));
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;

        loop {
            match tokio::time::timeout(idle, stream.next()).await {
                Err(_) => {
                    return Err(MediaError::network(
                        url,
                        format!("transfer stalled for {}s", idle.as_secs_f64()),
                        true,
                    ))
                }
                Ok(None) => break,
                Ok(Some(Err(e))) => return Err(MediaError::network(url, e.to_string(), true)),
                Ok(Some(Ok(chunk))) => {
                    file.write_all(&chunk).await?;
                    written += chunk.len() as u64;
                }
            }
        }
        file.flush().await?;

        if written == 0 {
            return Err(MediaError::network(url, "empty response body", false));
        }

        Ok(written)
    }
}

async fn copy_local(url: &str, parsed: &Url, dest: &Path) -> MediaResult<u64> {
    let source = parsed
        .to_file_path()
        .map_err(|_| MediaError::network(url, "not a local file path", false))?;

    if !tokio::fs::try_exists(&source).await.unwrap_or(false) {
        return Err(MediaError::network(url, "source file not found", false));
    }

    debug!("Copying {} to {}", source.display(), dest.display());
    match tokio::fs::copy(&source, dest).await {
        Ok(bytes) => Ok(bytes),
        Err(e) => {
            remove_partial(dest).await;
            Err(e.into())
        }
    }
}

async fn remove_partial(dest: &Path) {
    if let Err(e) = tokio::fs::remove_file(dest).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove partial download {}: {}", dest.display(), e);
        }
    }
}
