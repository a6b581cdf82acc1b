use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use taskgate_core::gateway::{TaskSnapshot, TaskSubmission};
use taskgate_core::models::task::{StatusPatch, TaskStatus};
use taskgate_core::orchestration::TaskFilter;
use taskgate_core::{AppState, GatewayError};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_tasks).post(submit_task))
        .route("/{id}", get(get_task))
        .route("/{id}/status", post(update_task_status))
}

/// POST /api/tasks: 202 with the new record, 200 on idempotent replay
async fn submit_task(
    State(state): State<AppState>,
    Json(body): Json<TaskSubmission>,
) -> Result<(StatusCode, Json<TaskSnapshot>), GatewayError> {
    let submitted = state.gateway.submit(body).await?;
    let status = if submitted.replayed {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    };
    Ok((status, Json(submitted.snapshot)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListTasksQuery {
    agent_id: Option<String>,
    status: Option<String>,
}

async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<ListTasksQuery>,
) -> Result<Json<serde_json::Value>, GatewayError> {
    let status = match &query.status {
        Some(s) => Some(
            TaskStatus::from_str(s)
                .ok_or_else(|| GatewayError::Validation(format!("Invalid status: {}", s)))?,
        ),
        None => None,
    };
    let filter = TaskFilter {
        agent_id: query.agent_id,
        status,
    };
    let tasks = state.router.list_tasks(&filter).await?;
    Ok(Json(serde_json::json!({ "tasks": tasks })))
}

/// GET /api/tasks/{id}: agent task or workflow run, tagged by `type`
async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TaskSnapshot>, GatewayError> {
    state
        .gateway
        .get(&id)
        .await?
        .map(Json)
        .ok_or_else(|| GatewayError::NotFound(format!("Task {} not found", id)))
}

/// POST /api/tasks/{id}/status: callback from external agents
async fn update_task_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<StatusPatch>,
) -> Result<Json<serde_json::Value>, GatewayError> {
    let task = state
        .router
        .update_task_status(&id, patch)
        .await?
        .ok_or_else(|| GatewayError::NotFound(format!("Task {} not found", id)))?;
    Ok(Json(serde_json::json!({ "task": task })))
}
