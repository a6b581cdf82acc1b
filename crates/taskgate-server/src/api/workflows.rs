use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use taskgate_core::workflow::{WorkflowDefinition, WorkflowRun};
use taskgate_core::{AppState, GatewayError};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_workflows).post(register_workflow))
        .route("/runs", get(list_runs))
        .route("/runs/{run_id}", get(get_run))
        .route("/{id}", get(get_workflow))
        .route("/{id}/runs", post(start_run))
}

/// POST /api/workflows: body is JSON, or YAML when the content type says so
async fn register_workflow(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<(StatusCode, Json<serde_json::Value>), GatewayError> {
    let is_yaml = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains("yaml"));

    let definition = if is_yaml {
        WorkflowDefinition::from_yaml(&body)?
    } else {
        let value: serde_json::Value = serde_json::from_str(&body)
            .map_err(|e| GatewayError::Validation(format!("Invalid workflow JSON: {}", e)))?;
        WorkflowDefinition::from_json(value)?
    };

    state.engine.register(definition.clone()).await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "workflow": definition })),
    ))
}

async fn list_workflows(State(state): State<AppState>) -> Json<serde_json::Value> {
    let workflows: Vec<WorkflowDefinition> = state
        .engine
        .list_definitions()
        .await
        .into_iter()
        .map(|def| (*def).clone())
        .collect();
    Json(serde_json::json!({ "workflows": workflows }))
}

async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<WorkflowDefinition>, GatewayError> {
    state
        .engine
        .definition(&id)
        .await
        .map(|def| Json((*def).clone()))
        .ok_or_else(|| GatewayError::NotFound(format!("Workflow {} not found", id)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartRunQuery {
    run_id: Option<String>,
}

/// POST /api/workflows/{id}/runs: starts in the background, 202 with the initial snapshot
async fn start_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<StartRunQuery>,
) -> Result<(StatusCode, Json<WorkflowRun>), GatewayError> {
    let run = state.gateway.start_workflow(&id, query.run_id).await?;
    Ok((StatusCode::ACCEPTED, Json(run)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListRunsQuery {
    workflow_id: Option<String>,
}

async fn list_runs(
    State(state): State<AppState>,
    Query(query): Query<ListRunsQuery>,
) -> Json<serde_json::Value> {
    let runs = state.engine.list_runs(query.workflow_id.as_deref()).await;
    Json(serde_json::json!({ "runs": runs }))
}

async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<WorkflowRun>, GatewayError> {
    state
        .engine
        .run_snapshot(&run_id)
        .await
        .map(Json)
        .ok_or_else(|| GatewayError::NotFound(format!("Run {} not found", run_id)))
}
