//! Metrics definitions for the reports gateway.
//!
//! All metrics follow Prometheus naming conventions:
//! - `rg_` prefix for the reports gateway
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `method`: HTTP methods
//! - `endpoint`: the known routes plus `/other`
//! - `outcome` / `status`: fixed sets defined by the recording code
//! - `trigger`: initial, scheduled, unknown_kid
//!
//! No label ever carries an email, token or key ID.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize the Prometheus recorder and return the handle used to
/// render `/metrics`.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("rg_http_request".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.200, 0.500, 1.000, 2.000, 5.000,
            ],
        )
        .map_err(|e| format!("Failed to set HTTP request buckets: {e}"))?
        // Store reads include up to three attempts with backoff
        .set_buckets_for_metric(
            Matcher::Prefix("rg_store_query".to_string()),
            &[
                0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 5.000,
            ],
        )
        .map_err(|e| format!("Failed to set store query buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("rg_jwks_refresh".to_string()),
            &[0.010, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000],
        )
        .map_err(|e| format!("Failed to set key set refresh buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// HTTP Request Metrics
// ============================================================================

/// Record HTTP request completion
///
/// Metric: `rg_http_requests_total`, `rg_http_request_duration_seconds`
/// Labels: `method`, `endpoint`, `status_code` / `status`
pub fn record_http_request(method: &str, endpoint: &str, status_code: u16, duration: Duration) {
    let endpoint = normalize_endpoint(endpoint);
    let status = categorize_status_code(status_code);

    histogram!("rg_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => endpoint,
        "status" => status
    )
    .record(duration.as_secs_f64());

    counter!("rg_http_requests_total",
        "method" => method.to_string(),
        "endpoint" => endpoint,
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

fn categorize_status_code(status_code: u16) -> &'static str {
    match status_code {
        200..=299 => "success",
        401 => "unauthenticated",
        408 | 504 => "timeout",
        _ => "error",
    }
}

/// Map a request path onto a fixed set of labels.
fn normalize_endpoint(path: &str) -> &'static str {
    match path {
        "/reports" => "/reports",
        "/health" => "/health",
        "/metrics" => "/metrics",
        _ => "/other",
    }
}

// ============================================================================
// Authentication Metrics
// ============================================================================

/// Record a token verification result
///
/// Metric: `rg_token_validations_total`
/// Labels: `outcome` (success, malformed, unknown_key, algorithm, expired,
/// not_yet_valid, signature, issuer, iat, invalid, missing_claim)
pub fn record_token_validation(outcome: &'static str) {
    counter!("rg_token_validations_total", "outcome" => outcome).increment(1);
}

/// Record a key set refresh
///
/// Metric: `rg_jwks_refresh_total`, `rg_jwks_refresh_duration_seconds`
/// Labels: `trigger`, `status`
pub fn record_key_set_refresh(trigger: &'static str, status: &'static str, duration: Duration) {
    histogram!("rg_jwks_refresh_duration_seconds", "trigger" => trigger)
        .record(duration.as_secs_f64());

    counter!("rg_jwks_refresh_total",
        "trigger" => trigger,
        "status" => status
    )
    .increment(1);
}

// ============================================================================
// Store Metrics
// ============================================================================

/// Record one report query attempt
///
/// Metric: `rg_store_queries_total`, `rg_store_query_duration_seconds`
/// Labels: `status` (success, error, timeout)
pub fn record_store_query(status: &'static str, duration: Duration) {
    histogram!("rg_store_query_duration_seconds", "status" => status)
        .record(duration.as_secs_f64());

    counter!("rg_store_queries_total", "status" => status).increment(1);
}
