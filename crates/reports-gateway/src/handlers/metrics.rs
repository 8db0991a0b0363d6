//! Prometheus metrics endpoint handler.
//!
//! # Security
//!
//! This endpoint is unauthenticated so Prometheus can scrape it. Metric
//! labels never carry emails, tokens or key IDs.

use axum::{extract::State, response::IntoResponse};
use metrics_exporter_prometheus::PrometheusHandle;

/// Handler for GET /metrics
///
/// Returns 200 OK with the Prometheus text format:
/// ```text
/// # TYPE rg_http_requests_total counter
/// rg_http_requests_total{method="GET",endpoint="/reports",status_code="200"} 42
/// ```
#[tracing::instrument(skip_all, name = "rg.metrics.scrape")]
pub async fn metrics_handler(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    handle.render()
}
