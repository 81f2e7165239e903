//! Metrics collection and exposition.
//!
//! # Metrics
//! - `guard_auth_attempts_total` (counter): login attempts by outcome
//! - `guard_rate_limited_total` (counter): calls rejected by the limiter
//! - `guard_limiter_errors_total` (counter): limiter store failures

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Start the Prometheus scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_auth_attempt(outcome: &'static str) {
    ::metrics::counter!("guard_auth_attempts_total", "outcome" => outcome).increment(1);
}

pub fn record_rate_limited() {
    ::metrics::counter!("guard_rate_limited_total").increment(1);
}

pub fn record_limiter_error() {
    ::metrics::counter!("guard_limiter_errors_total").increment(1);
}
