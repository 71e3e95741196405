//! Blob store seam for published artifacts.
//!
//! Keys passed to and returned by [`BlobStore`] are relative to the store's
//! publish prefix: `<job_id>/<name>`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use remix_models::JobId;
use remix_storage::{artifact_key, job_prefix, public_url, R2Client};

use crate::error::WorkerResult;

/// A published object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobObject {
    /// Key relative to the publish prefix
    pub key: String,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

impl BlobObject {
    /// Job the object belongs to.
    pub fn job_id(&self) -> Option<&str> {
        self.key.split('/').next().filter(|s| !s.is_empty())
    }
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Upload `local` as `<job_id>/<name>` and return its public URL.
    ///
    /// Publishing the same name again overwrites and yields the same URL.
    async fn publish(&self, local: &Path, job_id: &JobId, name: &str) -> WorkerResult<String>;

    /// Objects whose relative key starts with `prefix`.
    async fn list(&self, prefix: &str) -> WorkerResult<Vec<BlobObject>>;

    /// Delete objects whose relative key starts with `prefix`.
    async fn delete_by_prefix(&self, prefix: &str) -> WorkerResult<u32>;
}

/// Cloudflare R2 publisher.
pub struct R2BlobStore {
    client: R2Client,
    prefix: String,
}

impl R2BlobStore {
    pub fn new(client: R2Client, prefix: impl Into<String>) -> Self {
        Self {
            client,
            prefix: prefix.into().trim_matches('/').to_string(),
        }
    }

    fn full_key(&self, relative: &str) -> String {
        if self.prefix.is_empty() {
            relative.to_string()
        } else {
            format!("{}/{}", self.prefix, relative)
        }
    }

    fn relative_key<'a>(&self, key: &'a str) -> &'a str {
        if self.prefix.is_empty() {
            return key;
        }
        key.strip_prefix(self.prefix.as_str())
            .map(|rest| rest.trim_start_matches('/'))
            .unwrap_or(key)
    }
}

#[async_trait]
impl BlobStore for R2BlobStore {
    async fn publish(&self, local: &Path, job_id: &JobId, name: &str) -> WorkerResult<String> {
        let url = self
            .client
            .publish_artifact(local, &self.prefix, job_id.as_str(), name)
            .await?;
        info!("Published {} for job {}", name, job_id);
        Ok(url)
    }

    async fn list(&self, prefix: &str) -> WorkerResult<Vec<BlobObject>> {
        let objects = self.client.list_objects(&self.full_key(prefix)).await?;
        Ok(objects
            .into_iter()
            .map(|o| BlobObject {
                key: self.relative_key(&o.key).to_string(),
                size: o.size,
                modified: o
                    .last_modified
                    .and_then(|ms| i64::try_from(ms).ok())
                    .and_then(DateTime::from_timestamp_millis),
            })
            .collect())
    }

    async fn delete_by_prefix(&self, prefix: &str) -> WorkerResult<u32> {
        Ok(self.client.delete_prefix(&self.full_key(prefix)).await?)
    }
}

/// Publisher writing into a local directory served under `base_url`.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
    base_url: String,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.into(),
        }
    }

    /// Serve files straight from disk through `file://` URLs.
    pub fn with_file_urls(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let base_url = format!("file://{}", root.display());
        Self { root, base_url }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// All stored files with their relative keys.
    async fn walk(&self) -> WorkerResult<Vec<(String, PathBuf, std::fs::Metadata)>> {
        let mut found = Vec::new();
        if !tokio::fs::try_exists(&self.root).await.unwrap_or(false) {
            return Ok(found);
        }

        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let meta = entry.metadata().await?;
                if meta.is_dir() {
                    pending.push(path);
                    continue;
                }
                let Ok(relative) = path.strip_prefix(&self.root) else {
                    continue;
                };
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                found.push((key, path, meta));
            }
        }
        Ok(found)
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn publish(&self, local: &Path, job_id: &JobId, name: &str) -> WorkerResult<String> {
        let key = artifact_key("", job_id.as_str(), name)?;
        let dest = self.root.join(&key);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(local, &dest).await?;
        debug!("Stored {} at {}", name, dest.display());
        Ok(public_url(&self.base_url, &key))
    }

    async fn list(&self, prefix: &str) -> WorkerResult<Vec<BlobObject>> {
        Ok(self
            .walk()
            .await?
            .into_iter()
            .filter(|(key, _, _)| key.starts_with(prefix))
            .map(|(key, _, meta)| BlobObject {
                key,
                size: meta.len(),
                modified: meta.modified().ok().map(DateTime::<Utc>::from),
            })
            .collect())
    }

    async fn delete_by_prefix(&self, prefix: &str) -> WorkerResult<u32> {
        let mut deleted = 0u32;
        for (key, path, _) in self.walk().await? {
            if key.starts_with(prefix) {
                tokio::fs::remove_file(&path).await?;
                deleted += 1;
            }
        }

        // Drop the job directory once it is empty.
        let dir = prefix.trim_end_matches('/');
        if !dir.is_empty() && prefix == job_prefix("", dir) {
            let _ = tokio::fs::remove_dir(self.root.join(dir)).await;
        }
        Ok(deleted)
    }
}
