//! Webhook binding creation and trigger ingress.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{Method, StatusCode};
use axum::Json;
use serde_json::Value;
use uuid::Uuid;

use engine::models::WebhookAuth;
use engine::{WebhookBinding, WorkflowExecution};

use super::AppState;
use crate::error::ApiError;

#[derive(serde::Deserialize)]
pub struct BindDto {
    pub workflow_id: Uuid,
    pub path: String,
    pub method: String,
    #[serde(default)]
    pub auth: WebhookAuth,
}

/// Bind `(path, method)` to a workflow. 409 when the pair is taken.
pub async fn bind(
    State(state): State<AppState>,
    Json(dto): Json<BindDto>,
) -> Result<(StatusCode, Json<WebhookBinding>), ApiError> {
    let mut binding = WebhookBinding::new(dto.workflow_id, dto.path, &dto.method);
    binding.auth = dto.auth;
    let created = state.engine.register_webhook(binding).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// Trigger ingress: `(path, method)` routes to `execute` with the request
/// body as trigger payload. Any method is accepted here; matching against
/// the binding decides whether the request fires anything.
pub async fn ingress(
    Path(path): Path<String>,
    method: Method,
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<WorkflowExecution>), ApiError> {
    let payload: Value = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap_or(Value::Null)
    };

    let execution = state
        .engine
        .handle_webhook(&path, method.as_str(), payload)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(execution)))
}
