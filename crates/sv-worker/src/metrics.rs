//! Pipeline metrics.

use std::net::SocketAddr;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::{WorkerError, WorkerResult};

/// Metric names as constants for consistency.
pub mod names {
    // Ingestion
    pub const FRAMES_INGESTED_TOTAL: &str = "sv_frames_ingested_total";
    pub const FRAMES_RATE_LIMITED_TOTAL: &str = "sv_frames_rate_limited_total";
    pub const SOURCE_FAILURES_TOTAL: &str = "sv_source_failures_total";

    // Detection
    pub const DECODE_FAILURES_TOTAL: &str = "sv_decode_failures_total";
    pub const MODEL_FAILURES_TOTAL: &str = "sv_model_failures_total";
    pub const INFERENCE_DURATION_SECONDS: &str = "sv_inference_duration_seconds";

    // Plates
    pub const PLATE_CROPS_DISPATCHED_TOTAL: &str = "sv_plate_crops_dispatched_total";
    pub const PLATE_CROPS_DROPPED_TOTAL: &str = "sv_plate_crops_dropped_total";
    pub const PLATES_ACCEPTED_TOTAL: &str = "sv_plates_accepted_total";

    // Alerts and health
    pub const ALERTS_PUBLISHED_TOTAL: &str = "sv_alerts_published_total";
    pub const HEALTH_TRANSITIONS_TOTAL: &str = "sv_health_transitions_total";
}

/// Install the Prometheus recorder with its HTTP listener.
pub fn init_metrics(addr: SocketAddr) -> WorkerResult<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| WorkerError::config_error(format!("metrics exporter: {}", e)))
}

pub fn record_frame_ingested() {
    counter!(names::FRAMES_INGESTED_TOTAL).increment(1);
}

pub fn record_frame_rate_limited() {
    counter!(names::FRAMES_RATE_LIMITED_TOTAL).increment(1);
}

pub fn record_source_failure() {
    counter!(names::SOURCE_FAILURES_TOTAL).increment(1);
}

pub fn record_decode_failure() {
    counter!(names::DECODE_FAILURES_TOTAL).increment(1);
}

/// `reason` is one of `error`, `panic`, `timeout`.
pub fn record_model_failure(model: &str, reason: &'static str) {
    let labels = [("model", model.to_string()), ("reason", reason.to_string())];
    counter!(names::MODEL_FAILURES_TOTAL, &labels).increment(1);
}

pub fn record_inference(model: &str, duration_secs: f64) {
    histogram!(names::INFERENCE_DURATION_SECONDS, "model" => model.to_string()).record(duration_secs);
}

pub fn record_plate_crop(dispatched: bool) {
    if dispatched {
        counter!(names::PLATE_CROPS_DISPATCHED_TOTAL).increment(1);
    } else {
        counter!(names::PLATE_CROPS_DROPPED_TOTAL).increment(1);
    }
}

pub fn record_plate_accepted(authorized: bool) {
    counter!(names::PLATES_ACCEPTED_TOTAL, "authorized" => authorized.to_string()).increment(1);
}

pub fn record_alert(alert_type: &'static str) {
    counter!(names::ALERTS_PUBLISHED_TOTAL, "type" => alert_type).increment(1);
}

pub fn record_health_transition(state: &'static str) {
    counter!(names::HEALTH_TRANSITIONS_TOTAL, "state" => state).increment(1);
}
