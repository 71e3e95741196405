//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::Semaphore;

use remix_firestore::DEFAULT_COLLECTION;

/// Upper bound on job slots: the semaphore limit, and `acquire_many` takes a `u32`.
pub const MAX_JOB_SLOTS: usize = if Semaphore::MAX_PERMITS < u32::MAX as usize {
    Semaphore::MAX_PERMITS
} else {
    u32::MAX as usize
};

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrent jobs
    pub max_concurrent_jobs: usize,
    /// How often pending jobs are discovered
    pub poll_interval: Duration,
    /// Root under which every job attempt gets its own directory
    pub work_dir: PathBuf,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Retries for terminal status writes
    pub store_retries: u32,
    /// Publish trimmed tracks and record their URLs before separation
    pub publish_trimmed: bool,
    /// Firestore collection holding job documents
    pub collection: String,
    /// Blob key prefix for published artifacts
    pub publish_prefix: String,
    /// Maximum age of published artifacts; `None` disables the sweep
    pub retention: Option<Duration>,
    /// Interval between retention sweeps
    pub retention_interval: Duration,
    /// Port of the Prometheus listener, if any
    pub metrics_port: Option<u16>,
    /// Publish into a local directory instead of R2
    pub local_blob_dir: Option<PathBuf>,
    /// Base URL for artifacts in `local_blob_dir`
    pub local_blob_url: Option<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
            poll_interval: Duration::from_secs(5),
            work_dir: PathBuf::from("/tmp/remix"),
            shutdown_timeout: Duration::from_secs(30),
            store_retries: 3,
            publish_trimmed: true,
            collection: DEFAULT_COLLECTION.to_string(),
            publish_prefix: "remixes".to_string(),
            retention: None,
            retention_interval: Duration::from_secs(3600),
            metrics_port: None,
            local_blob_dir: None,
            local_blob_url: None,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            max_concurrent_jobs: std::env::var("WORKER_MAX_JOBS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n: &usize| *n > 0)
                .map(|n| n.min(MAX_JOB_SLOTS))
                .unwrap_or(defaults.max_concurrent_jobs),
            poll_interval: std::env::var("WORKER_POLL_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n: &u64| *n > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.poll_interval),
            work_dir: std::env::var("WORKER_WORK_DIR")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            shutdown_timeout: std::env::var("WORKER_SHUTDOWN_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.shutdown_timeout),
            store_retries: std::env::var("WORKER_STORE_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.store_retries),
            publish_trimmed: std::env::var("WORKER_PUBLISH_TRIMMED")
                .ok()
                .and_then(|s| parse_bool(&s))
                .unwrap_or(defaults.publish_trimmed),
            collection: std::env::var("REMIX_COLLECTION")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(defaults.collection),
            publish_prefix: std::env::var("REMIX_PUBLISH_PREFIX")
                .ok()
                .map(|s| s.trim_matches('/').to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.publish_prefix),
            retention: std::env::var("REMIX_RETENTION_HOURS")
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .filter(|h| *h > 0)
                .and_then(|h| h.checked_mul(3600))
                .map(Duration::from_secs),
            retention_interval: std::env::var("REMIX_RETENTION_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n: &u64| *n > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.retention_interval),
            metrics_port: std::env::var("METRICS_PORT")
                .ok()
                .and_then(|s| s.parse().ok()),
            local_blob_dir: std::env::var("REMIX_LOCAL_BLOB_DIR")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
            local_blob_url: std::env::var("REMIX_LOCAL_BLOB_URL")
                .ok()
                .filter(|s| !s.trim().is_empty()),
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
