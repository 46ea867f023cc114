//! Metrics collection and exposition.
//!
//! # Metrics
//! - `router_dispatch_total` (counter): dispatched requests by method
//! - `router_unhandled_failures_total` (counter): requests rendered by the
//!   default error path, by status
//! - `router_dispatch_duration_seconds` (histogram): time from dispatch to
//!   response completion, by status
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; exposition is a separate,
//!   optional Prometheus listener

use std::net::SocketAddr;
use std::time::Instant;

use axum::http::{Method, StatusCode};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its HTTP scrape listener.
/// Must run inside a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, address = %addr, "Failed to install metrics exporter"),
    }
}

pub fn record_dispatch(method: &Method) {
    metrics::counter!("router_dispatch_total", "method" => method.to_string()).increment(1);
}

pub fn record_unhandled(status: StatusCode) {
    metrics::counter!(
        "router_unhandled_failures_total",
        "status" => status.as_u16().to_string()
    )
    .increment(1);
}

pub fn record_duration(status: StatusCode, start: Instant) {
    metrics::histogram!(
        "router_dispatch_duration_seconds",
        "status" => status.as_u16().to_string()
    )
    .record(start.elapsed().as_secs_f64());
}
