//! Firestore request metrics.

use metrics::{counter, histogram};

/// Metric name constants.
pub mod names {
    /// Firestore requests by operation and status.
    pub const REQUESTS_TOTAL: &str = "remix_firestore_requests_total";

    /// Retry attempts by operation.
    pub const RETRIES_TOTAL: &str = "remix_firestore_retries_total";

    /// Request latency in seconds by operation.
    pub const LATENCY_SECONDS: &str = "remix_firestore_latency_seconds";

    /// Claims lost to a concurrent writer.
    pub const CLAIM_CONFLICTS_TOTAL: &str = "remix_firestore_claim_conflicts_total";
}

/// Record metrics for a completed Firestore request.
pub fn record_request(operation: &str, status: u16, latency_ms: f64) {
    counter!(
        names::REQUESTS_TOTAL,
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    histogram!(
        names::LATENCY_SECONDS,
        "operation" => operation.to_string()
    )
    .record(latency_ms / 1000.0);
}

/// Record a retry attempt.
pub fn record_retry(operation: &str) {
    counter!(names::RETRIES_TOTAL, "operation" => operation.to_string()).increment(1);
}

/// Record a claim that lost the update-time race.
pub fn record_claim_conflict() {
    counter!(names::CLAIM_CONFLICTS_TOTAL).increment(1);
}
