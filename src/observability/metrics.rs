//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by route, status
//! - `gateway_request_duration_seconds` (histogram): latency distribution
//! - `gateway_cache_hits_total` / `gateway_cache_misses_total` (counters)
//! - `gateway_cache_stores_total` (counter): documents committed
//! - `gateway_cache_size_bytes` (gauge): body bytes held by the cache
//! - `gateway_stock_busy` (gauge): leased items per stock key
//! - `gateway_node_status` (gauge): 0=ok, 1=fade, 2=response, 3=connect, 4=monitor
//!
//! Without an installed recorder every call is a no-op, so library code and
//! tests record unconditionally.

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::health::FailureStatus;

/// Start the Prometheus scrape endpoint on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(route: &str, status: u16, elapsed: Duration) {
    metrics::counter!(
        "gateway_requests_total",
        "route" => route.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("gateway_request_duration_seconds", "route" => route.to_string())
        .record(elapsed.as_secs_f64());
}

pub fn record_cache_hit() {
    metrics::counter!("gateway_cache_hits_total").increment(1);
}

pub fn record_cache_miss() {
    metrics::counter!("gateway_cache_misses_total").increment(1);
}

pub fn record_cache_store(size: usize) {
    metrics::counter!("gateway_cache_stores_total").increment(1);
    metrics::histogram!("gateway_cache_document_bytes").record(size as f64);
}

pub fn set_cache_size(bytes: usize) {
    metrics::gauge!("gateway_cache_size_bytes").set(bytes as f64);
}

pub fn set_stock_busy(key: &str, busy: usize) {
    metrics::gauge!("gateway_stock_busy", "key" => key.to_string()).set(busy as f64);
}

pub fn record_node_status(addr: SocketAddr, status: FailureStatus) {
    let value = match status {
        FailureStatus::Ok => 0.0,
        FailureStatus::Fade => 1.0,
        FailureStatus::Response => 2.0,
        FailureStatus::Connect => 3.0,
        FailureStatus::Monitor => 4.0,
    };
    metrics::gauge!("gateway_node_status", "node" => addr.to_string()).set(value);
}
