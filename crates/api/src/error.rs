//! Maps the engine's error taxonomy onto HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use engine::{ControlError, EngineError, StoreError};

/// Wrapper so handlers can use `?` on engine calls.
pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, details) = match &self.0 {
            EngineError::Validation(errors) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Some(errors.iter().map(|e| e.to_string()).collect::<Vec<_>>()),
            ),
            EngineError::Control(ControlError::UnknownExecution(_)) => {
                (StatusCode::NOT_FOUND, None)
            }
            EngineError::Control(_) => (StatusCode::CONFLICT, None),
            EngineError::Inactive(_) => (StatusCode::CONFLICT, None),
            EngineError::Store(StoreError::NotFound) => (StatusCode::NOT_FOUND, None),
            EngineError::Store(StoreError::Conflict(_)) => (StatusCode::CONFLICT, None),
            EngineError::Store(StoreError::Backend(_)) | EngineError::Step { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, None)
            }
        };

        let body = json!({
            "error": self.0.to_string(),
            "details": details,
        });
        (status, Json(body)).into_response()
    }
}
