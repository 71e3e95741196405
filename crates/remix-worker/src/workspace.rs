//! Per-attempt local workspaces.
//!
//! Every path a job touches on local disk comes from its [`Workspace`]:
//! one directory `<work_dir>/<job_id>-<attempt>` per attempt. Ending the
//! workspace removes everything it issued, and dropping it without ending
//! does the same synchronously.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, warn};
use uuid::Uuid;

use remix_models::{ArtifactRole, JobId, Stage};

use crate::error::WorkerResult;

/// Hands out workspaces under one root directory.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the directory of a new attempt for `job_id`.
    pub async fn begin(&self, job_id: &JobId) -> WorkerResult<Workspace> {
        let attempt_id = Uuid::new_v4().simple().to_string()[..12].to_string();
        let dir = self.root.join(format!("{}-{}", job_id, attempt_id));
        tokio::fs::create_dir_all(&dir).await?;
        debug!("Created workspace {}", dir.display());

        Ok(Workspace {
            job_id: job_id.clone(),
            attempt_id,
            dir,
            issued: Mutex::new(HashMap::new()),
            ended: false,
        })
    }
}

/// Local file set of one job attempt.
#[derive(Debug)]
pub struct Workspace {
    job_id: JobId,
    attempt_id: String,
    dir: PathBuf,
    issued: Mutex<HashMap<(Stage, ArtifactRole), PathBuf>>,
    ended: bool,
}

impl Workspace {
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn attempt_id(&self) -> &str {
        &self.attempt_id
    }

    /// Attempt directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the artifact `stage` produces for `role`.
    ///
    /// The same `(stage, role)` always yields the same path.
    pub fn path(&self, stage: Stage, role: ArtifactRole) -> PathBuf {
        let mut issued = self.issued.lock().unwrap_or_else(|p| p.into_inner());
        issued
            .entry((stage, role))
            .or_insert_with(|| self.dir.join(artifact_name(stage, role)))
            .clone()
    }

    /// Every path issued so far.
    pub fn issued_paths(&self) -> Vec<PathBuf> {
        let issued = self.issued.lock().unwrap_or_else(|p| p.into_inner());
        let mut paths: Vec<PathBuf> = issued.values().cloned().collect();
        paths.sort();
        paths
    }

    /// Remove every issued path and the attempt directory.
    ///
    /// Failures are logged, never returned.
    pub async fn end(mut self) {
        for path in self.issued_paths() {
            remove_path(&path).await;
        }
        if let Err(e) = tokio::fs::remove_dir_all(&self.dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove workspace {}: {}", self.dir.display(), e);
            }
        }
        debug!("Ended workspace {}", self.dir.display());
        self.ended = true;
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.ended {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(
                    "Failed to remove abandoned workspace {}: {}",
                    self.dir.display(),
                    e
                );
            }
        }
    }
}

/// File or directory name of a stage artifact.
///
/// Separation writes a directory; the separator lays out its stems inside.
fn artifact_name(stage: Stage, role: ArtifactRole) -> String {
    let role = role.as_str();
    match stage {
        Stage::Download => format!("{}.src", role),
        Stage::Trim => format!("{}_trimmed.mp3", role),
        Stage::Transcode => format!("{}.wav", role),
        Stage::Separate => format!("separated_{}", role),
        Stage::Merge => format!("{}.mp3", role),
        Stage::Publish => format!("publish_{}", role),
    }
}

async fn remove_path(path: &Path) {
    let result = match tokio::fs::symlink_metadata(path).await {
        Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(path).await,
        Ok(_) => tokio::fs::remove_file(path).await,
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
}
