//! Prometheus exposition for the gateway
//!
//! The key-pool crate emits its own counters through the `metrics` facade;
//! this module installs the recorder they all land in and adds the per-route
//! request metrics:
//!
//! - `gateway_requests_total` (counter): labels `status`, `route`
//! - `gateway_request_duration_seconds` (histogram): label `route`

use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

const DURATION_METRIC: &str = "gateway_request_duration_seconds";

/// Bucket bounds in seconds. Synthesis with backoff can take tens of seconds,
/// so the range runs up to two minutes.
const DURATION_BUCKETS: &[f64] = &[
    0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0,
];

fn builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Full(DURATION_METRIC.to_string()), DURATION_BUCKETS)
}

/// Install the global Prometheus recorder and return the render handle.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    builder()?.install_recorder()
}

/// Record one finished request.
pub fn record_request(route: &str, status: u16, duration_secs: f64) {
    metrics::counter!(
        "gateway_requests_total",
        "status" => status.to_string(),
        "route" => route.to_string()
    )
    .increment(1);
    metrics::histogram!(DURATION_METRIC, "route" => route.to_string()).record(duration_secs);
}
