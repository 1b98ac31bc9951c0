//! Building record endpoints
//!
//! GET  /buildings/:key
//! POST /buildings/:key/refresh   (the segment may also be an address)
//! GET  /buildings/:key/narrative-bundle
//! PUT  /buildings/:key/narratives

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::info;

use super::remember_error;
use crate::error::{ApiError, ApiResult, PipelineError};
use crate::keys::{Bbl, BuildingRef};
use crate::narrative::{self, NarrativeBundle};
use crate::pipeline::Refresh;
use crate::types::{AggregatedLeadRecord, ManualEntry, NarrativeEntry, SystemCategory};
use crate::AppState;

fn parse_key(text: &str) -> ApiResult<Bbl> {
    Bbl::parse(text).map_err(|e| ApiError::Pipeline(PipelineError::from(e)))
}

/// GET /buildings/:key
pub async fn get_building(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<Json<AggregatedLeadRecord>> {
    let key = parse_key(&key)?;
    let record = state.pipeline.store().get(&key).await?;
    record
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no lead record for {}", key)))
}

#[derive(Debug, Default, Deserialize)]
pub struct RefreshParams {
    /// Run even when the stored record is fresh
    #[serde(default)]
    pub force: bool,
}

/// POST /buildings/:key/refresh
///
/// Optional JSON body: manual values used as the lowest-precedence source.
pub async fn refresh_building(
    State(state): State<AppState>,
    Path(reference): Path<String>,
    Query(params): Query<RefreshParams>,
    payload: Result<Json<ManualEntry>, JsonRejection>,
) -> ApiResult<Json<Refresh>> {
    let manual = match payload {
        Ok(Json(manual)) => Some(manual),
        Err(JsonRejection::MissingJsonContentType(_)) => None,
        Err(rejection) => return Err(ApiError::BadRequest(rejection.body_text())),
    };

    let reference = BuildingRef::parse(&reference).map_err(PipelineError::from)?;
    info!(reference = %reference, force = params.force, manual = manual.is_some(), "Refresh requested");

    let result = if params.force {
        state
            .pipeline
            .run(&reference, manual.as_ref())
            .await
            .map(|report| Refresh::Fresh { report })
    } else {
        state.pipeline.run_if_stale(&reference, manual.as_ref()).await
    };

    match result {
        Ok(refresh) => Ok(Json(refresh)),
        Err(err) => Err(remember_error(&state, ApiError::from(err)).await),
    }
}

/// GET /buildings/:key/narrative-bundle
pub async fn get_narrative_bundle(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<Json<NarrativeBundle>> {
    let key = parse_key(&key)?;
    let bundle = narrative::bundle_for(state.pipeline.store().as_ref(), &key).await?;
    Ok(Json(bundle))
}

/// PUT /buildings/:key/narratives
///
/// Stores generator output; other field groups are left untouched.
pub async fn put_narratives(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(narratives): Json<BTreeMap<SystemCategory, NarrativeEntry>>,
) -> ApiResult<StatusCode> {
    let key = parse_key(&key)?;
    narrative::store_narratives(state.pipeline.store().as_ref(), &key, &narratives).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub fn building_routes() -> Router<AppState> {
    Router::new()
        .route("/buildings/:key", get(get_building))
        // One parameter name per segment; refresh reads it as a reference
        .route("/buildings/:key/refresh", post(refresh_building))
        .route("/buildings/:key/narrative-bundle", get(get_narrative_bundle))
        .route("/buildings/:key/narratives", put(put_narratives))
}
