//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by final status code
//! - `gateway_request_duration_seconds` (histogram): chain latency
//! - `gateway_stage_rejections_total` (counter): rejections by stage, status
//! - `gateway_rate_limited_total` (counter): 429s from the rate limiter
//! - `gateway_tracked_clients` (gauge): identities held by the rate limiter
//!
//! Recording is a no-op until [`init_metrics`] installs the exporter.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter with an HTTP listener on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(status: u16, start: Instant) {
    counter!("gateway_requests_total", "status" => status.to_string()).increment(1);
    histogram!("gateway_request_duration_seconds").record(start.elapsed().as_secs_f64());
}

pub fn record_stage_rejection(stage: &'static str, status: &'static str) {
    counter!("gateway_stage_rejections_total", "stage" => stage, "status" => status).increment(1);
}

pub fn record_rate_limited() {
    counter!("gateway_rate_limited_total").increment(1);
}

pub fn record_tracked_clients(count: usize) {
    gauge!("gateway_tracked_clients").set(count as f64);
}
