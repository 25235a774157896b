//! Gateway request metrics.

use metrics::{counter, histogram};

pub mod names {
    /// Gateway requests by operation and status.
    pub const REQUESTS_TOTAL: &str = "sv_gateway_requests_total";

    /// Retried gateway requests by operation.
    pub const RETRIES_TOTAL: &str = "sv_gateway_retries_total";

    /// Request latency in seconds by operation.
    pub const LATENCY_SECONDS: &str = "sv_gateway_latency_seconds";
}

/// Record a completed request. `status` is 0 when no response arrived.
pub fn record_request(operation: &str, status: u16, latency_secs: f64) {
    counter!(
        names::REQUESTS_TOTAL,
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    histogram!(names::LATENCY_SECONDS, "operation" => operation.to_string()).record(latency_secs);
}

pub fn record_retry(operation: &str) {
    counter!(names::RETRIES_TOTAL, "operation" => operation.to_string()).increment(1);
}
