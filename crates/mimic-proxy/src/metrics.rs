//! Prometheus metrics for the mimic proxy.
//!
//! Tracks how requests were answered, upstream latency, recordings written
//! and filter failures.
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, register_int_gauge, CounterVec, Encoder,
    HistogramVec, IntGauge, TextEncoder,
};
use tracing::warn;

lazy_static! {
    /// Requests handled, by mode and by how they were answered
    pub static ref REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "mimic_requests_total",
        "Total number of requests handled by the proxy",
        &["mode", "outcome"]  // outcome: replayed|forwarded|recorded|not_found|ambiguous|unreachable|no_response
    )
    .unwrap();

    /// Upstream call duration
    pub static ref UPSTREAM_REQUEST_DURATION_MS: HistogramVec = register_histogram_vec!(
        "mimic_upstream_request_duration_ms",
        "Duration of upstream requests in milliseconds",
        &["method", "result"],  // result: ok|error
        vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0]
    )
    .unwrap();

    /// Recordings written by recording modes
    pub static ref RECORDINGS_SAVED_TOTAL: CounterVec = register_counter_vec!(
        "mimic_recordings_saved_total",
        "Total number of recordings created or updated",
        &["kind", "result"]  // kind: new|merged, result: saved|save_failed
    )
    .unwrap();

    /// Filter hooks that returned an error or panicked
    pub static ref FILTER_FAILURES_TOTAL: CounterVec = register_counter_vec!(
        "mimic_filter_failures_total",
        "Total number of failed filter hook invocations",
        &["filter", "hook"]
    )
    .unwrap();

    /// Delay applied before answering
    pub static ref REPLAY_DELAY_MS: HistogramVec = register_histogram_vec!(
        "mimic_replay_delay_ms",
        "Histogram of response delays in milliseconds",
        &["mode"],
        vec![10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0]
    )
    .unwrap();

    /// Recordings currently loaded
    pub static ref RECORDINGS_LOADED: IntGauge = register_int_gauge!(
        "mimic_recordings_loaded",
        "Number of recordings in the match tree"
    )
    .unwrap();
}

/// Collect and return all metrics in Prometheus text format
pub fn collect_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

pub fn record_request(mode: &str, outcome: &str) {
    REQUESTS_TOTAL.with_label_values(&[mode, outcome]).inc();
}

pub fn record_upstream_duration(method: &str, ok: bool, duration_ms: f64) {
    let result = if ok { "ok" } else { "error" };
    UPSTREAM_REQUEST_DURATION_MS
        .with_label_values(&[method, result])
        .observe(duration_ms);
}

pub fn record_recording_saved(merged: bool, saved: bool) {
    let kind = if merged { "merged" } else { "new" };
    let result = if saved { "saved" } else { "save_failed" };
    RECORDINGS_SAVED_TOTAL.with_label_values(&[kind, result]).inc();
}

pub fn record_filter_failure(filter: &str, hook: &str) {
    FILTER_FAILURES_TOTAL.with_label_values(&[filter, hook]).inc();
}

pub fn record_delay(mode: &str, delay_ms: u64) {
    REPLAY_DELAY_MS
        .with_label_values(&[mode])
        .observe(delay_ms as f64);
}

pub fn set_recordings_loaded(count: usize) {
    RECORDINGS_LOADED.set(i64::try_from(count).unwrap_or(i64::MAX));
}
