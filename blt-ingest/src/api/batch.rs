//! Batch endpoint

use axum::{extract::State, routing::post, Json, Router};
use serde::Deserialize;
use tracing::info;

use crate::error::{ApiError, ApiResult};
use crate::pipeline::BatchReport;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    /// Keys or addresses, one building each
    pub references: Vec<String>,
    #[serde(default)]
    pub force: bool,
}

/// POST /batch
///
/// Always 200 once the batch ran; per-building failures are in the report.
pub async fn run_batch(
    State(state): State<AppState>,
    Json(request): Json<BatchRequest>,
) -> ApiResult<Json<BatchReport>> {
    if request.references.is_empty() {
        return Err(ApiError::BadRequest("references must not be empty".to_string()));
    }

    info!(buildings = request.references.len(), force = request.force, "Batch requested");
    let report = state.pipeline.run_batch(&request.references, request.force).await;

    if let Some(failure) = report.failed.first() {
        *state.last_error.write().await = Some(format!(
            "batch: {} failed ({}): {}",
            failure.reference, failure.kind, failure.message
        ));
    }

    Ok(Json(report))
}

pub fn batch_routes() -> Router<AppState> {
    Router::new().route("/batch", post(run_batch))
}
