//! Prometheus export and attendance counters.

use metrics::counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

use super::ForwardOutcome;

/// Global handle to the Prometheus recorder.
pub static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder.
///
/// Must run once at startup, before anything is recorded. Panics on a second
/// call.
pub fn init_metrics() {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    if METRICS_HANDLE.set(handle).is_err() {
        panic!("failed to set metrics handle: already initialized");
    }
}

/// Current metrics in Prometheus text format.
pub fn get_metrics() -> String {
    METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized".to_string())
}

pub fn record_submission(stored: bool, forward: &ForwardOutcome) {
    counter!(
        "attendance_submissions_total",
        "stored" => stored.to_string(),
        "forward" => forward.label()
    )
    .increment(1);
}

pub fn record_listing(succeeded: bool) {
    let result = if succeeded { "ok" } else { "degraded" };
    counter!("attendance_list_requests_total", "result" => result).increment(1);
}
