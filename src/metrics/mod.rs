//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Committed events by type
//! - Rate limit rejections
//! - Promise deliveries and timeouts
//! - Fee escrow activity
//! - Operation failures and latency

use crate::error::{CoordinatorError, CoordinatorResult};
use crate::limiter::LimitKind;

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Event metrics
    pub static ref EVENTS_EMITTED: CounterVec = register_counter_vec!(
        "coordinator_events_emitted_total",
        "Total committed events by type",
        &["event_type"]
    ).unwrap();

    // Limiter metrics
    pub static ref LIMIT_REJECTIONS: CounterVec = register_counter_vec!(
        "coordinator_limit_rejections_total",
        "Total operations rejected by the rate limiter",
        &["kind"]
    ).unwrap();

    // Promise metrics
    pub static ref PROMISE_DELIVERIES: CounterVec = register_counter_vec!(
        "coordinator_promise_deliveries_total",
        "Total listener deliveries by outcome",
        &["outcome"]
    ).unwrap();

    // Timeout metrics
    pub static ref TIMEOUTS: CounterVec = register_counter_vec!(
        "coordinator_timeouts_total",
        "Total timeouts by stage",
        &["stage"]
    ).unwrap();

    pub static ref PENDING_TIMEOUTS: GaugeVec = register_gauge_vec!(
        "coordinator_pending_timeouts",
        "Unresolved timeouts",
        &[]
    ).unwrap();

    // Fee metrics
    pub static ref FEES_BLOCKED: CounterVec = register_counter_vec!(
        "coordinator_fees_blocked_total",
        "Total escrow blocks per chain",
        &["chain_slug"]
    ).unwrap();

    pub static ref FEES_WITHDRAWN: CounterVec = register_counter_vec!(
        "coordinator_fees_withdrawn_total",
        "Total transmitter withdrawals per chain",
        &["chain_slug"]
    ).unwrap();

    // Operation metrics
    pub static ref OPERATION_FAILURES: CounterVec = register_counter_vec!(
        "coordinator_operation_failures_total",
        "Total failed operations by error code",
        &["operation", "code"]
    ).unwrap();

    pub static ref OPERATION_LATENCY: HistogramVec = register_histogram_vec!(
        "coordinator_operation_latency_seconds",
        "Operation processing latency",
        &["operation"],
        vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]
    ).unwrap();

    // Health metrics
    pub static ref HEALTH_CHECK_SUCCESS: CounterVec = register_counter_vec!(
        "coordinator_health_check_success_total",
        "Total successful health checks",
        &[]
    ).unwrap();

    pub static ref HEALTH_CHECK_FAILURE: CounterVec = register_counter_vec!(
        "coordinator_health_check_failure_total",
        "Total failed health checks",
        &[]
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> CoordinatorResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| CoordinatorError::Internal(format!("Failed to bind {}: {}", addr, e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| CoordinatorError::Internal(format!("Metrics server error: {}", e)))?;

        Ok(())
    }
}

async fn metrics_handler() -> Result<String, StatusCode> {
    render().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

/// Text exposition of every registered metric
pub fn render() -> CoordinatorResult<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| CoordinatorError::Internal(format!("Failed to encode metrics: {}", e)))?;
    String::from_utf8(buffer)
        .map_err(|e| CoordinatorError::Internal(format!("Metrics are not UTF-8: {}", e)))
}

// Helper functions to record metrics

pub fn record_event(event_type: &str) {
    EVENTS_EMITTED.with_label_values(&[event_type]).inc();
}

pub fn record_limit_rejection(kind: LimitKind) {
    LIMIT_REJECTIONS.with_label_values(&[kind.as_str()]).inc();
}

pub fn record_promise_deliveries(accepted: usize, rejected: usize) {
    PROMISE_DELIVERIES
        .with_label_values(&["accepted"])
        .inc_by(accepted as f64);
    PROMISE_DELIVERIES
        .with_label_values(&["rejected"])
        .inc_by(rejected as f64);
}

pub fn record_timeout_scheduled() {
    TIMEOUTS.with_label_values(&["scheduled"]).inc();
}

pub fn record_timeout_resolved() {
    TIMEOUTS.with_label_values(&["resolved"]).inc();
}

pub fn record_pending_timeouts(pending: usize) {
    PENDING_TIMEOUTS.with_label_values(&[]).set(pending as f64);
}

pub fn record_fees_blocked(chain_slug: u32) {
    FEES_BLOCKED
        .with_label_values(&[&chain_slug.to_string()])
        .inc();
}

pub fn record_fees_withdrawn(chain_slug: u32) {
    FEES_WITHDRAWN
        .with_label_values(&[&chain_slug.to_string()])
        .inc();
}

pub fn record_operation_failure(operation: &str, code: &str) {
    OPERATION_FAILURES
        .with_label_values(&[operation, code])
        .inc();
}

pub fn record_operation_latency(operation: &str, latency_secs: f64) {
    OPERATION_LATENCY
        .with_label_values(&[operation])
        .observe(latency_secs);
}

pub fn record_health_check() {
    HEALTH_CHECK_SUCCESS.with_label_values(&[]).inc();
}

pub fn record_health_check_failure() {
    HEALTH_CHECK_FAILURE.with_label_values(&[]).inc();
}
