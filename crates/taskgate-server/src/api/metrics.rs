use axum::{extract::State, routing::get, Json, Router};

use taskgate_core::{AppState, GatewayError};

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(get_metrics))
}

/// GET /api/metrics: engine run counters plus registry and task counts
async fn get_metrics(State(state): State<AppState>) -> Result<Json<serde_json::Value>, GatewayError> {
    let agents = state.router.list_agents().await?;
    let active = agents.iter().filter(|a| a.is_active()).count();

    Ok(Json(serde_json::json!({
        "workflows": {
            "registered": state.engine.list_definitions().await.len(),
            "runs": state.engine.system_metrics(),
        },
        "tasks": state.router.task_counts().await,
        "agents": {
            "total": agents.len(),
            "active": active,
        },
        "collectedAt": chrono::Utc::now(),
    })))
}
