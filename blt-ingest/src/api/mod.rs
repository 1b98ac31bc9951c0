//! HTTP API handlers

pub mod batch;
pub mod buildings;
pub mod health;
pub mod runs;

pub use batch::batch_routes;
pub use buildings::building_routes;
pub use health::health_routes;
pub use runs::run_routes;

use crate::error::ApiError;
use crate::AppState;

/// Keep the latest failure for `/health` before handing the error back
pub(crate) async fn remember_error(state: &AppState, err: ApiError) -> ApiError {
    *state.last_error.write().await = Some(err.to_string());
    err
}
