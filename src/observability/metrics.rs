//! Metrics collection and exposition.
//!
//! # Metrics
//! - `http_rate_limited_total` (counter): requests rejected by the rate limiter
//! - `rate_limiter_clients` (gauge): clients currently tracked by the registry
//! - `rate_limiter_evictions_total` (counter): idle clients removed by the sweep
//! - `background_tasks_total` (counter): background tasks dispatched
//! - `background_tasks_active` (gauge): background tasks still running
//! - `background_task_panics_total` (counter): background tasks that panicked
//!
//! Recording is a no-op until a recorder is installed, so library code and
//! tests can call these freely.

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_rate_limited() {
    metrics::counter!("http_rate_limited_total").increment(1);
}

pub fn record_tracked_clients(count: usize) {
    metrics::gauge!("rate_limiter_clients").set(count as f64);
}

pub fn record_evictions(count: usize) {
    metrics::counter!("rate_limiter_evictions_total").increment(count as u64);
}

pub fn record_task_started(active: usize) {
    metrics::counter!("background_tasks_total").increment(1);
    metrics::gauge!("background_tasks_active").set(active as f64);
}

pub fn record_task_finished(active: usize) {
    metrics::gauge!("background_tasks_active").set(active as f64);
}

pub fn record_task_panic() {
    metrics::counter!("background_task_panics_total").increment(1);
}
