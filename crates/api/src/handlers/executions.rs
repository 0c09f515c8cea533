//! Execution lifecycle handlers: execute, poll, pause, resume, terminate.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::Value;
use uuid::Uuid;

use engine::{TriggerType, WorkflowExecution};

use super::AppState;
use crate::error::ApiError;

#[derive(serde::Deserialize, Default)]
pub struct ExecuteDto {
    /// Trigger payload handed to the start node.
    #[serde(default)]
    pub payload: Value,
    /// Client idempotency token: re-posting the same token returns the
    /// existing execution.
    #[serde(default)]
    pub instance_id: Option<String>,
}

/// Bodies on these endpoints are optional; an empty body means defaults.
fn parse_body<T: serde::de::DeserializeOwned + Default>(body: &Bytes) -> T {
    if body.is_empty() {
        T::default()
    } else {
        serde_json::from_slice(body).unwrap_or_default()
    }
}

pub async fn execute(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<WorkflowExecution>), ApiError> {
    let dto: ExecuteDto = parse_body(&body);
    let execution = state
        .engine
        .execute(id, TriggerType::Manual, dto.payload, dto.instance_id)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(execution)))
}

/// Read-only snapshot for status polling.
pub async fn get_one(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<WorkflowExecution>, ApiError> {
    Ok(Json(state.engine.get_execution(id).await?))
}

pub async fn pause(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<StatusCode, ApiError> {
    state.engine.pause(id).await?;
    Ok(StatusCode::ACCEPTED)
}

#[derive(serde::Deserialize, Default)]
pub struct ResumeDto {
    /// Optional payload recorded as the wait node's output.
    #[serde(default)]
    pub payload: Option<Value>,
}

pub async fn resume(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<WorkflowExecution>), ApiError> {
    let dto: ResumeDto = parse_body(&body);
    let execution = state.engine.resume(id, dto.payload).await?;
    Ok((StatusCode::ACCEPTED, Json(execution)))
}

pub async fn terminate(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<StatusCode, ApiError> {
    state.engine.terminate(id).await?;
    Ok(StatusCode::ACCEPTED)
}
