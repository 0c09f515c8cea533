//! Workflow CRUD + validation handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};
use uuid::Uuid;

use engine::WorkflowDefinition;

use super::AppState;
use crate::error::ApiError;

pub async fn create(
    State(state): State<AppState>,
    Json(definition): Json<WorkflowDefinition>,
) -> Result<(StatusCode, Json<WorkflowDefinition>), ApiError> {
    let saved = state.engine.create_workflow(definition).await?;
    Ok((StatusCode::CREATED, Json(saved)))
}

/// Pure validation: nothing is persisted, warnings ride along.
pub async fn validate(
    State(state): State<AppState>,
    Json(definition): Json<WorkflowDefinition>,
) -> Json<Value> {
    let report = state.engine.validate(&definition);
    Json(json!({
        "valid": report.valid,
        "errors": report.errors.iter().map(|e| e.to_string()).collect::<Vec<_>>(),
        "warnings": report.warnings.iter().map(|w| w.to_string()).collect::<Vec<_>>(),
    }))
}

pub async fn list(
    State(state): State<AppState>,
) -> Result<Json<Vec<WorkflowDefinition>>, ApiError> {
    Ok(Json(state.engine.list_workflows().await?))
}

pub async fn get_one(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<WorkflowDefinition>, ApiError> {
    Ok(Json(state.engine.get_workflow(id).await?))
}

pub async fn delete_one(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<StatusCode, ApiError> {
    state.engine.delete_workflow(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
