//! Reports handler.

use crate::auth::Identity;
use crate::errors::GatewayError;
use crate::models::Record;
use crate::routes::AppState;
use axum::extract::State;
use axum::{Extension, Json};
use std::sync::Arc;
use tracing::instrument;

/// Handler for GET /reports
///
/// Returns the authenticated caller's reports as a JSON array. The caller is
/// identified solely by the verified token; the request carries no other
/// input.
///
/// # Response
///
/// - 200 OK with `[]` or a list of records
/// - 503 Service Unavailable if the store fails and the failure policy
///   surfaces store errors
#[instrument(skip_all, name = "rg.handlers.reports")]
pub async fn get_reports(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<Vec<Record>>, GatewayError> {
    let records = state.gateway.fetch_records(&identity).await?;

    tracing::debug!(
        target: "rg.handlers.reports",
        record_count = records.len(),
        "Serving reports"
    );

    Ok(Json(records))
}
