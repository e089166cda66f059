//! Scheduler control endpoints.

use axum::{extract::State, response::IntoResponse, routing::post, Json, Router};
use lavanderia_id::RequestId;

use crate::api::error::ApiError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/scan", post(scan))
}

/// Run one assignment pass now and return its counters.
///
/// POST /v1/scheduler/scan
async fn scan(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let request_id = RequestId::new();

    let stats = state
        .scheduler()
        .scan_now()
        .await
        .map_err(|e| ApiError::from(e).with_request_id(request_id.to_string()))?;

    tracing::info!(
        assigned = stats.assigned,
        pending = stats.pending,
        request_id = %request_id,
        "Manual scan complete"
    );
    Ok(Json(stats))
}
