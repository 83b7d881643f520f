//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define tunnel metrics (requests, latency, errors, sessions)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `bare_requests_total` (counter): HTTP tunnel requests by version, status
//! - `bare_request_duration_seconds` (histogram): time until remote headers arrive
//! - `bare_errors_total` (counter): error envelopes by code
//! - `bare_websocket_sessions_total` (counter): WebSocket tunnels opened by version
//! - `bare_websocket_active` (gauge): currently pumping WebSocket tunnels
//! - `bare_metadata_entries` (gauge): live metadata records
//! - `bare_ssrf_blocked_total` (counter): connections refused by the address guard
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - Labels stay low-cardinality (version, status, code)

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(version: &'static str, status: u16, start: Instant) {
    counter!("bare_requests_total", "version" => version, "status" => status.to_string())
        .increment(1);
    histogram!("bare_request_duration_seconds", "version" => version)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_error(code: &'static str) {
    counter!("bare_errors_total", "code" => code).increment(1);
}

pub fn record_websocket_opened(version: &'static str) {
    counter!("bare_websocket_sessions_total", "version" => version).increment(1);
}

pub fn set_websocket_active(count: u64) {
    gauge!("bare_websocket_active").set(count as f64);
}

pub fn set_metadata_entries(count: usize) {
    gauge!("bare_metadata_entries").set(count as f64);
}

pub fn record_ssrf_blocked() {
    counter!("bare_ssrf_blocked_total").increment(1);
}
