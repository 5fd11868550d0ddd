use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

use crate::store::StoreError;

/// Typed error hierarchy for the matching engine (§7). Each variant maps to
/// exactly one HTTP status; `Persistence` and `Internal` are logged in full
/// before the response is redacted — callers never see storage internals or
/// panics-turned-errors.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0}")]
    Validation(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("order not found")]
    NotFound,

    #[error("{0}")]
    InvalidState(String),

    #[error("persistence failure")]
    Persistence(#[from] StoreError),

    #[error("internal error")]
    Internal(#[source] anyhow::Error),
}

impl EngineError {
    fn status(&self) -> StatusCode {
        match self {
            EngineError::Validation(_) => StatusCode::BAD_REQUEST,
            EngineError::Unauthorized => StatusCode::UNAUTHORIZED,
            EngineError::NotFound => StatusCode::NOT_FOUND,
            EngineError::InvalidState(_) => StatusCode::CONFLICT,
            EngineError::Persistence(_) => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The message surfaced to the client. `Persistence`/`Internal` never
    /// leak their source — only the logs get the detail.
    fn public_message(&self) -> String {
        match self {
            EngineError::Persistence(_) => "storage unavailable".to_string(),
            EngineError::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        match &self {
            EngineError::Persistence(e) => {
                tracing::error!(error = %e, "persistence commit failed");
            }
            EngineError::Internal(e) => {
                tracing::error!(error = %e, "internal engine error");
            }
            _ => {}
        }
        let status = self.status();
        let body = Json(json!({ "error": self.public_message() }));
        (status, body).into_response()
    }
}
