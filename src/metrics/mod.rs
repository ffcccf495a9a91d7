//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Dispatch outcomes and receipt results
//! - Nonce reservations and the shadow nonce
//! - Lock contention
//! - Ledger compaction and dropped telemetry

use crate::error::{OperatorError, OperatorResult};

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram, register_int_counter,
    CounterVec, Encoder, Gauge, Histogram, IntCounter, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Dispatch metrics
    pub static ref DISPATCH_TOTAL: CounterVec = register_counter_vec!(
        "operator_dispatch_total",
        "Dispatch attempts by outcome",
        &["outcome"]
    ).unwrap();

    pub static ref RECEIPTS_TOTAL: CounterVec = register_counter_vec!(
        "operator_receipts_total",
        "Background receipt results by status",
        &["status"]
    ).unwrap();

    pub static ref COMMIT_FAILURES: IntCounter = register_int_counter!(
        "operator_commit_failures_total",
        "Broadcast transactions whose ledger write failed"
    ).unwrap();

    // Nonce metrics
    pub static ref NONCE_RESERVATIONS: CounterVec = register_counter_vec!(
        "operator_nonce_reservations_total",
        "Nonce reservations by reconciliation branch",
        &["branch"]
    ).unwrap();

    pub static ref SHADOW_NONCE: Gauge = register_gauge!(
        "operator_shadow_nonce",
        "Last committed shadow nonce"
    ).unwrap();

    pub static ref PENDING_DELETED: IntCounter = register_int_counter!(
        "operator_pending_entries_deleted_total",
        "Pending entries removed by compaction"
    ).unwrap();

    pub static ref LOCK_WAIT: Histogram = register_histogram!(
        "operator_lock_wait_seconds",
        "Time spent waiting for the dispatch lock",
        vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]
    ).unwrap();

    // Telemetry metrics
    pub static ref TELEMETRY_DROPPED: IntCounter = register_int_counter!(
        "operator_telemetry_dropped_total",
        "Telemetry events dropped because the queue was full or closed"
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

    pub async fn run(&self) -> OperatorResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| OperatorError::Internal(format!("Metrics bind failed: {}", e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| OperatorError::Internal(format!("Metrics server failed: {}", e)))
    }
}

async fn metrics_handler() -> Result<String, StatusCode> {
    render().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

fn render() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

// Helper functions to record metrics

pub fn record_dispatch(outcome: &str) {
    DISPATCH_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_receipt(status: &str) {
    RECEIPTS_TOTAL.with_label_values(&[status]).inc();
}

pub fn record_commit_failure() {
    COMMIT_FAILURES.inc();
}

pub fn record_reservation(branch: &str) {
    NONCE_RESERVATIONS.with_label_values(&[branch]).inc();
}

pub fn record_shadow_nonce(nonce: u64) {
    SHADOW_NONCE.set(nonce as f64);
}

pub fn record_pending_deleted(count: u64) {
    PENDING_DELETED.inc_by(count);
}

pub fn record_lock_wait(secs: f64) {
    LOCK_WAIT.observe(secs);
}

pub fn record_telemetry_dropped() {
    TELEMETRY_DROPPED.inc();
}
