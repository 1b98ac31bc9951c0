//! Run log review endpoint

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use crate::error::ApiResult;
use crate::store::RunLogEntry;
use crate::AppState;

fn default_limit() -> u32 {
    50
}

#[derive(Debug, Deserialize)]
pub struct RunsParams {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Only aborted runs
    #[serde(default)]
    pub failed: bool,
}

/// GET /runs?limit=50&failed=true
pub async fn list_runs(
    State(state): State<AppState>,
    Query(params): Query<RunsParams>,
) -> ApiResult<Json<Vec<RunLogEntry>>> {
    let runs = state
        .pipeline
        .store()
        .recent_runs(params.limit.min(1000), params.failed)
        .await?;
    Ok(Json(runs))
}

pub fn run_routes() -> Router<AppState> {
    Router::new().route("/runs", get(list_runs))
}
