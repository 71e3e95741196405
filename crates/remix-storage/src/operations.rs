//! Artifact-level operations built on [`R2Client`].

use std::path::Path;

use tracing::info;

use crate::client::R2Client;
use crate::error::StorageResult;
use crate::keys::{artifact_key, content_type_for};

impl R2Client {
    /// Upload a job artifact under `<prefix>/<job_id>/<name>` and return its
    /// public URL.
    pub async fn publish_artifact(
        &self,
        path: impl AsRef<Path>,
        prefix: &str,
        job_id: &str,
        name: &str,
    ) -> StorageResult<String> {
        let key = artifact_key(prefix, job_id, name)?;
        self.upload_file(path, &key, content_type_for(name)).await?;
        Ok(self.public_url(&key))
    }

    /// Delete every object under `prefix`.
    pub async fn delete_prefix(&self, prefix: &str) -> StorageResult<u32> {
        let keys: Vec<String> = self
            .list_objects(prefix)
            .await?
            .into_iter()
            .map(|o| o.key)
            .collect();

        let deleted = self.delete_objects(&keys).await?;
        info!("Deleted {} objects under {}", deleted, prefix);
        Ok(deleted)
    }
}
