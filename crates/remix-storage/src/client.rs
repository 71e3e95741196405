//! S3-API client pointed at a Cloudflare R2 bucket.

use std::path::Path;

use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Builder, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use aws_sdk_s3::Client;
use tracing::debug;

use crate::error::{StorageError, StorageResult};

/// DeleteObjects accepts at most this many keys per request.
const DELETE_BATCH_SIZE: usize = 1000;

/// Bucket coordinates and credentials, read from `R2_*` variables.
#[derive(Debug, Clone)]
pub struct R2Config {
    pub endpoint_url: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket_name: String,
    /// `auto` unless `R2_REGION` says otherwise
    pub region: String,
    /// Base of the URLs handed back to callers
    pub public_base_url: String,
}

impl R2Config {
    pub fn from_env() -> StorageResult<Self> {
        Ok(Self {
            endpoint_url: required("R2_ENDPOINT_URL")?,
            access_key_id: required("R2_ACCESS_KEY_ID")?,
            secret_access_key: required("R2_SECRET_ACCESS_KEY")?,
            bucket_name: required("R2_BUCKET_NAME")?,
            region: std::env::var("R2_REGION").unwrap_or_else(|_| "auto".to_string()),
            public_base_url: required("R2_PUBLIC_URL")?,
        })
    }
}

fn required(name: &str) -> StorageResult<String> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| StorageError::config(format!("{} not set", name)))
}

#[derive(Clone)]
pub struct R2Client {
    client: Client,
    bucket: String,
    public_base_url: String,
}

impl R2Client {
    pub async fn new(config: R2Config) -> StorageResult<Self> {
        let R2Config {
            endpoint_url,
            access_key_id,
            secret_access_key,
            bucket_name,
            region,
            public_base_url,
        } = config;

        // R2 serves buckets on the path, not as subdomains.
        let s3 = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(endpoint_url)
            .region(Region::new(region))
            .credentials_provider(Credentials::new(
                access_key_id,
                secret_access_key,
                None,
                None,
                "r2-static",
            ))
            .force_path_style(true)
            .build();

        Ok(Self {
            client: Client::from_conf(s3),
            bucket: bucket_name,
            public_base_url,
        })
    }

    pub async fn from_env() -> StorageResult<Self> {
        Self::new(R2Config::from_env()?).await
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Public URL of `key`.
    pub fn public_url(&self, key: &str) -> String {
        crate::keys::public_url(&self.public_base_url, key)
    }

    /// PUT a local file; an existing object under `key` is replaced.
    pub async fn upload_file(
        &self,
        path: impl AsRef<Path>,
        key: &str,
        content_type: &str,
    ) -> StorageResult<()> {
        let path = path.as_ref();
        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| StorageError::LocalFile {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::upload(key, e))?;

        debug!(key, "uploaded {}", path.display());
        Ok(())
    }

    /// Remove `keys` with DeleteObjects; returns the number removed.
    pub async fn delete_objects(&self, keys: &[String]) -> StorageResult<u32> {
        let mut deleted = 0u32;

        for batch in keys.chunks(DELETE_BATCH_SIZE) {
            let objects = batch
                .iter()
                .map(|k| {
                    ObjectIdentifier::builder()
                        .key(k)
                        .build()
                        .map_err(|e| StorageError::InvalidKey(e.to_string()))
                })
                .collect::<StorageResult<Vec<_>>>()?;

            let delete = Delete::builder()
                .set_objects(Some(objects))
                .quiet(true)
                .build()
                .map_err(|e| StorageError::Delete(e.to_string()))?;

            self.client
                .delete_objects()
                .bucket(&self.bucket)
                .delete(delete)
                .send()
                .await
                .map_err(|e| StorageError::Delete(e.to_string()))?;

            deleted += batch.len() as u32;
        }

        Ok(deleted)
    }

    /// Every object under `prefix`, following continuation tokens.
    pub async fn list_objects(&self, prefix: &str) -> StorageResult<Vec<ObjectInfo>> {
        let mut found = Vec::new();
        let mut next: Option<String> = None;

        loop {
            let page = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_continuation_token(next.take())
                .send()
                .await
                .map_err(|e| StorageError::list(prefix, e))?;

            found.extend(page.contents().iter().map(|obj| ObjectInfo {
                key: obj.key().unwrap_or_default().to_string(),
                size: obj.size().unwrap_or(0).max(0) as u64,
                last_modified: obj
                    .last_modified()
                    .and_then(|t| t.to_millis().ok())
                    .map(|ms| ms.max(0) as u64),
            }));

            next = page.next_continuation_token().map(str::to_string);
            if page.is_truncated() != Some(true) || next.is_none() {
                break;
            }
        }

        debug!(prefix, count = found.len(), "listed objects");
        Ok(found)
    }

    /// HEAD the bucket to confirm credentials and endpoint.
    pub async fn check_connectivity(&self) -> StorageResult<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| StorageError::Unreachable {
                bucket: self.bucket.clone(),
                message: e.to_string(),
            })?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Full bucket key, including any publish prefix
    pub key: String,
    pub size: u64,
    /// Milliseconds since the Unix epoch
    pub last_modified: Option<u64>,
}
