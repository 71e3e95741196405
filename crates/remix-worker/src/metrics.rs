//! Worker metrics.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

use remix_models::Stage;

use crate::error::{WorkerError, WorkerResult};

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_CLAIMED_TOTAL: &str = "remix_jobs_claimed_total";
    pub const JOBS_FINISHED_TOTAL: &str = "remix_jobs_finished_total";
    pub const JOBS_IN_FLIGHT: &str = "remix_jobs_in_flight";
    pub const STAGE_DURATION_SECONDS: &str = "remix_stage_duration_seconds";
    pub const TERMINAL_WRITE_FAILURES_TOTAL: &str = "remix_terminal_write_failures_total";
    pub const RETENTION_DELETED_TOTAL: &str = "remix_retention_deleted_objects_total";
}

/// Serve Prometheus metrics on `0.0.0.0:<port>`.
///
/// Must run inside a tokio runtime.
pub fn init_metrics(port: u16) -> WorkerResult<()> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| WorkerError::config_error(format!("metrics exporter: {}", e)))?;
    info!("Serving Prometheus metrics on {}", addr);
    Ok(())
}

pub fn record_job_claimed() {
    counter!(names::JOBS_CLAIMED_TOTAL).increment(1);
}

/// `outcome` is `done` or the error kind name.
pub fn record_job_finished(outcome: &str) {
    counter!(names::JOBS_FINISHED_TOTAL, "outcome" => outcome.to_string()).increment(1);
}

pub fn set_jobs_in_flight(count: usize) {
    gauge!(names::JOBS_IN_FLIGHT).set(count as f64);
}

pub fn record_stage(stage: Stage, elapsed: Duration, success: bool) {
    let labels = [
        ("stage", stage.as_str().to_string()),
        ("success", success.to_string()),
    ];
    histogram!(names::STAGE_DURATION_SECONDS, &labels).record(elapsed.as_secs_f64());
}

pub fn record_terminal_write_failure() {
    counter!(names::TERMINAL_WRITE_FAILURES_TOTAL).increment(1);
}

pub fn record_retention_deleted(objects: u32) {
    counter!(names::RETENTION_DELETED_TOTAL).increment(u64::from(objects));
}
