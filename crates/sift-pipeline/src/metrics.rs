//! Prometheus metrics for the pipeline
//!
//! Privacy-safe: only outcome/kind labels, never event content or
//! identifiers.

use metrics::{counter, gauge, histogram};
use std::time::Duration;

pub const OUTCOME_ACCEPTED: &str = "accepted";
pub const OUTCOME_DEFERRED: &str = "deferred";
pub const OUTCOME_DROPPED_PRESSURE: &str = "dropped_memory_pressure";
pub const OUTCOME_DROPPED_BACKPRESSURE: &str = "dropped_backpressure";
pub const OUTCOME_DROPPED_MALFORMED: &str = "dropped_malformed";
pub const OUTCOME_INACTIVE: &str = "inactive";

pub const FLUSH_OK: &str = "ok";
pub const FLUSH_PERMIT_TIMEOUT: &str = "permit_timeout";
pub const FLUSH_BUDGET_DENIED: &str = "budget_denied";
pub const FLUSH_PRIVACY_ERROR: &str = "privacy_error";
pub const FLUSH_SINK_ERROR: &str = "sink_error";

pub const PATTERN_SEQUENCE: &str = "sequence";
pub const PATTERN_TEMPORAL: &str = "temporal";

pub fn record_capture(outcome: &str, duration: Duration) {
    counter!("sift_capture_total", "outcome" => outcome.to_string()).increment(1);
    histogram!("sift_capture_duration_seconds", "outcome" => outcome.to_string())
        .record(duration.as_secs_f64());
}

pub fn record_flush(outcome: &str, events: usize, duration: Duration) {
    counter!("sift_flush_total", "outcome" => outcome.to_string()).increment(1);
    counter!("sift_flush_events_total", "outcome" => outcome.to_string())
        .increment(events as u64);
    histogram!("sift_flush_duration_seconds", "outcome" => outcome.to_string())
        .record(duration.as_secs_f64());
}

pub fn record_buffer_reject() {
    counter!("sift_buffer_rejects_total").increment(1);
}

pub fn set_buffer_depth(depth: usize) {
    gauge!("sift_buffer_depth").set(depth as f64);
}

pub fn set_batch_target(target: usize) {
    gauge!("sift_batch_target").set(target as f64);
}

pub fn set_memory_available(fraction: f64) {
    gauge!("sift_memory_available_fraction").set(fraction);
}

pub fn record_permit_wait(duration: Duration) {
    histogram!("sift_permit_wait_seconds").record(duration.as_secs_f64());
}

pub fn record_pattern(kind: &str) {
    counter!("sift_patterns_total", "kind" => kind.to_string()).increment(1);
}

pub fn record_suppressed(count: usize) {
    counter!("sift_suppressed_records_total").increment(count as u64);
}

pub fn init_prometheus_recorder() -> metrics_exporter_prometheus::PrometheusHandle {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    builder.install_recorder().expect("Failed to install Prometheus recorder")
}
