//! blt-ingest library interface
//!
//! Building data waterfall for energy-compliance leads: identity
//! resolution, source-priority merge, audit selection, penalty projection
//! and the lead-record store. Exposed as a library for the binary and for
//! integration tests.

pub mod api;
pub mod audit;
pub mod config;
pub mod error;
pub mod identity;
pub mod keys;
pub mod merge;
pub mod narrative;
pub mod parse;
pub mod penalty;
pub mod pipeline;
pub mod registries;
pub mod seed;
pub mod store;
pub mod types;
pub mod units;
pub mod utils;

pub use crate::error::{ApiError, ApiResult, PipelineError};

use axum::Router;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;

use crate::pipeline::Pipeline;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    /// Service startup timestamp for uptime reporting
    pub startup_time: DateTime<Utc>,
    /// Last failed request, reported by `/health`
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self {
            pipeline,
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::building_routes())
        .merge(api::batch_routes())
        .merge(api::run_routes())
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
