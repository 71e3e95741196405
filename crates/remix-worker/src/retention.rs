//! Retention sweep for published artifacts.
//!
//! A job's artifacts expire together: once the newest object under
//! `<job_id>/` is older than the configured age, the whole job prefix is
//! deleted.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use remix_storage::job_prefix;

use crate::blob::BlobStore;
use crate::error::{WorkerError, WorkerResult};
use crate::metrics::record_retention_deleted;

/// What one sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub jobs_scanned: usize,
    pub jobs_expired: usize,
    pub objects_deleted: u32,
}

/// Delete every job prefix whose newest object is older than `max_age`.
///
/// Objects without a modification time keep their job alive.
pub async fn sweep_expired(
    blobs: &dyn BlobStore,
    max_age: Duration,
    now: DateTime<Utc>,
) -> WorkerResult<SweepReport> {
    let max_age = chrono::Duration::from_std(max_age)
        .map_err(|e| WorkerError::config_error(format!("retention age: {}", e)))?;
    let cutoff = now - max_age;

    // Newest modification per job; `None` once any object lacks a time.
    let mut newest: BTreeMap<String, Option<DateTime<Utc>>> = BTreeMap::new();
    for object in blobs.list("").await? {
        let Some(job_id) = object.job_id() else {
            continue;
        };
        let entry = newest
            .entry(job_id.to_string())
            .or_insert(Some(DateTime::<Utc>::MIN_UTC));
        *entry = match (*entry, object.modified) {
            (Some(current), Some(modified)) => Some(current.max(modified)),
            _ => None,
        };
    }

    let mut report = SweepReport {
        jobs_scanned: newest.len(),
        ..Default::default()
    };

    for (job_id, latest) in newest {
        match latest {
            Some(latest) if latest < cutoff => {
                let deleted = blobs.delete_by_prefix(&job_prefix("", &job_id)).await?;
                debug!("Expired {} artifacts of job {}", deleted, job_id);
                report.jobs_expired += 1;
                report.objects_deleted += deleted;
            }
            _ => {}
        }
    }

    record_retention_deleted(report.objects_deleted);
    Ok(report)
}

/// Run [`sweep_expired`] every `interval` until shutdown.
pub fn spawn_retention(
    blobs: Arc<dyn BlobStore>,
    max_age: Duration,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            "Retention sweep enabled: max age {:?}, every {:?}",
            max_age, interval
        );
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    match sweep_expired(blobs.as_ref(), max_age, Utc::now()).await {
                        Ok(report) if report.jobs_expired > 0 => info!(
                            "Retention sweep removed {} objects from {} jobs",
                            report.objects_deleted, report.jobs_expired
                        ),
                        Ok(_) => {}
                        Err(e) => warn!("Retention sweep failed: {}", e),
                    }
                }
            }
        }
    })
}
