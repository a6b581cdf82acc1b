use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;

use taskgate_core::models::agent::{Agent, AgentRegistration};
use taskgate_core::{AppState, GatewayError};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_agents).post(register_agent))
        .route("/discover", get(discover_agents))
        .route("/{id}", get(get_agent))
        .route("/{id}/deactivate", post(deactivate_agent))
        .route("/{id}/activate", post(activate_agent))
        .route("/{id}/capabilities", put(update_capabilities))
}

async fn list_agents(State(state): State<AppState>) -> Result<Json<serde_json::Value>, GatewayError> {
    let agents = state.router.list_agents().await?;
    Ok(Json(serde_json::json!({ "agents": agents })))
}

/// POST /api/agents: 201 when created, 200 when it updated an existing agent
async fn register_agent(
    State(state): State<AppState>,
    Json(body): Json<AgentRegistration>,
) -> Result<(StatusCode, Json<serde_json::Value>), GatewayError> {
    let registered = state.router.register_agent(body).await?;
    let status = if registered.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(serde_json::json!({
            "agentId": registered.agent.id,
            "created": registered.created,
            "agent": registered.agent,
        })),
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DiscoverQuery {
    /// Comma-separated capability names
    #[serde(default)]
    capabilities: String,
    specialization: Option<String>,
    limit: Option<usize>,
}

async fn discover_agents(
    State(state): State<AppState>,
    Query(query): Query<DiscoverQuery>,
) -> Result<Json<serde_json::Value>, GatewayError> {
    let capabilities: Vec<String> = query
        .capabilities
        .split(',')
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();
    let agents = state
        .router
        .discover(&capabilities, query.specialization.as_deref(), query.limit)
        .await?;
    Ok(Json(serde_json::json!({ "agents": agents })))
}

async fn get_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Agent>, GatewayError> {
    state
        .router
        .get_agent(&id)
        .await?
        .map(Json)
        .ok_or_else(|| GatewayError::NotFound(format!("Agent {} not found", id)))
}

async fn deactivate_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Agent>, GatewayError> {
    Ok(Json(state.router.deactivate_agent(&id).await?))
}

async fn activate_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Agent>, GatewayError> {
    Ok(Json(state.router.activate_agent(&id).await?))
}

#[derive(Debug, Deserialize)]
struct UpdateCapabilitiesRequest {
    capabilities: Vec<String>,
}

async fn update_capabilities(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<UpdateCapabilitiesRequest>,
) -> Result<Json<Agent>, GatewayError> {
    Ok(Json(
        state.router.update_capabilities(&id, body.capabilities).await?,
    ))
}
