//! Error types for blt-ingest
//!
//! Three layers:
//! - [`RegistryError`]: what a registry adapter reports at its boundary
//! - [`PipelineError`]: why one building's run aborted
//! - [`ApiError`]: HTTP rendering of either

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::keys::KeyError;

/// Registry adapter failure
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RegistryError {
    /// Rate limit, 5xx, timeout or connection failure; worth retrying
    #[error("transient: {0}")]
    Transient(String),

    /// Non-retryable 4xx other than not-found
    #[error("rejected: {0}")]
    Permanent(String),

    /// Response arrived but could not be parsed into the typed schema
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl RegistryError {
    pub fn is_transient(&self) -> bool {
        matches!(self, RegistryError::Transient(_))
    }

    /// Escalate into a building-level failure, naming the registry
    pub fn into_pipeline(self, registry: &'static str) -> PipelineError {
        match self {
            RegistryError::Transient(message) => PipelineError::UpstreamTransient { registry, message },
            RegistryError::Permanent(message) | RegistryError::Malformed(message) => {
                PipelineError::UpstreamPermanent { registry, message }
            }
        }
    }
}

impl From<sqlx::Error> for RegistryError {
    fn from(err: sqlx::Error) -> Self {
        let message = err.to_string();
        if message.contains("database is locked") {
            RegistryError::Transient(message)
        } else {
            RegistryError::Permanent(message)
        }
    }
}

pub type RegistryResult<T> = Result<T, RegistryError>;

/// Why a building's pipeline run aborted
///
/// Skipped computations are not errors; see `StageOutcome::Skipped`.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid building reference: {0}")]
    InputValidation(String),

    #[error("No source resolves building: {0}")]
    NotFound(String),

    #[error("Geocoding confidence {confidence} below threshold {threshold} for '{address}'")]
    LowConfidence {
        address: String,
        confidence: f64,
        threshold: f64,
    },

    #[error("{registry} unavailable after retries: {message}")]
    UpstreamTransient {
        registry: &'static str,
        message: String,
    },

    #[error("{registry} rejected request: {message}")]
    UpstreamPermanent {
        registry: &'static str,
        message: String,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] blt_common::Error),
}

impl PipelineError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::UpstreamTransient { .. })
    }

    /// Short stable label used in the run log
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::InputValidation(_) => "input_validation",
            PipelineError::NotFound(_) => "not_found",
            PipelineError::LowConfidence { .. } => "low_confidence",
            PipelineError::UpstreamTransient { .. } => "upstream_transient",
            PipelineError::UpstreamPermanent { .. } => "upstream_permanent",
            PipelineError::Storage(_) => "storage",
        }
    }
}

impl From<KeyError> for PipelineError {
    fn from(err: KeyError) -> Self {
        PipelineError::InputValidation(err.to_string())
    }
}

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Pipeline failure for a single building
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// blt-common error
    #[error("Common error: {0}")]
    Common(#[from] blt_common::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code) = match &self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Pipeline(err) => match err {
                PipelineError::InputValidation(_) => (StatusCode::BAD_REQUEST, "INPUT_VALIDATION"),
                PipelineError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                PipelineError::LowConfidence { .. } => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "LOW_CONFIDENCE")
                }
                PipelineError::UpstreamTransient { .. } => {
                    (StatusCode::BAD_GATEWAY, "UPSTREAM_TRANSIENT")
                }
                PipelineError::UpstreamPermanent { .. } => {
                    (StatusCode::BAD_GATEWAY, "UPSTREAM_PERMANENT")
                }
                PipelineError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR"),
            },
            ApiError::Common(_) => (StatusCode::INTERNAL_SERVER_ERROR, "COMMON_ERROR"),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
