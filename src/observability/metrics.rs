//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define gateway metrics (cache outcomes, breaker state, pool, failover)
//! - Expose Prometheus-compatible metrics endpoint
//! - Track per-endpoint and aggregate metrics
//!
//! # Metrics
//! - `gateway_cache_requests_total` (counter): lookups by outcome (hit, miss, coalesced)
//! - `gateway_cache_entries` (gauge): live cache entries
//! - `gateway_breaker_state` (gauge): 0=closed, 1=open, 2=half-open
//! - `gateway_breaker_rejections_total` (counter): calls rejected by an open circuit
//! - `gateway_pool_acquire_total` (counter): acquires by outcome
//! - `gateway_pool_healthy` (gauge): healthy pooled sessions
//! - `gateway_target_health` (gauge): 1=healthy, 0=unhealthy per failover target
//! - `gateway_failover_total` (counter): switches of the active failover target
//! - `gateway_device_operation_duration_seconds` (histogram): device round trips
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed (tests run without one)
//! - Labels for component, endpoint, operation, outcome

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tokio::time::Instant;

/// Install the Prometheus recorder and its HTTP scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_cache_lookup(outcome: &'static str) {
    counter!("gateway_cache_requests_total", "outcome" => outcome).increment(1);
}

pub fn record_cache_size(entries: usize) {
    gauge!("gateway_cache_entries").set(entries as f64);
}

pub fn record_breaker_state(component: &str, state: u8) {
    gauge!("gateway_breaker_state", "component" => component.to_string()).set(state as f64);
}

pub fn record_breaker_rejection(component: &str) {
    counter!("gateway_breaker_rejections_total", "component" => component.to_string()).increment(1);
}

pub fn record_pool_acquire(outcome: &'static str) {
    counter!("gateway_pool_acquire_total", "outcome" => outcome).increment(1);
}

pub fn record_pool_healthy(healthy: usize) {
    gauge!("gateway_pool_healthy").set(healthy as f64);
}

pub fn record_target_health(endpoint: &str, healthy: bool) {
    gauge!("gateway_target_health", "endpoint" => endpoint.to_string())
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_failover(from: &str, to: &str) {
    counter!(
        "gateway_failover_total",
        "from" => from.to_string(),
        "to" => to.to_string()
    )
    .increment(1);
}

pub fn record_device_operation(operation: &'static str, outcome: &'static str, start: Instant) {
    histogram!(
        "gateway_device_operation_duration_seconds",
        "operation" => operation,
        "outcome" => outcome
    )
    .record(start.elapsed().as_secs_f64());
}
