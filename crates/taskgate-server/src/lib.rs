//! taskgate Server - HTTP adapter for the task gateway
//!
//! Exposes the gateway, agent registry and workflow engine from
//! `taskgate-core` as a JSON API via axum. Can be run standalone through the
//! `taskgate` CLI or embedded in another service.

pub mod api;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use taskgate_core::tools::{HttpToolInvoker, ToolInvoker, ToolRegistry};
use taskgate_core::{AppState, AppStateInner, GatewayConfig};

/// Configuration for the taskgate HTTP server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Optional YAML file with engine/router/gateway settings.
    pub config_path: Option<String>,
    /// Forward tool calls to `POST {tools_url}/tools/{toolId}` instead of
    /// the in-process registry.
    pub tools_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3220,
            config_path: None,
            tools_url: None,
        }
    }
}

/// Build the shared state and seed the built-in agents.
pub async fn create_app_state(config: &ServerConfig) -> Result<AppState, String> {
    let gateway_config = match &config.config_path {
        Some(path) => GatewayConfig::from_file(path).map_err(|e| e.to_string())?,
        None => GatewayConfig::default(),
    };

    let tools: Arc<dyn ToolInvoker> = match &config.tools_url {
        Some(url) => {
            tracing::info!("Forwarding tool calls to {}", url);
            Arc::new(HttpToolInvoker::new(url.clone()))
        }
        None => Arc::new(ToolRegistry::with_builtin_tools()),
    };

    let state: AppState = Arc::new(AppStateInner::new(gateway_config, tools));
    let seeded = state
        .router
        .register_builtin_agents()
        .await
        .map_err(|e| format!("Failed to register built-in agents: {}", e))?;
    tracing::info!("Registered {} built-in agents", seeded.len());

    Ok(state)
}

/// The full application: API routes, health check, CORS and request tracing.
pub fn build_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(api::api_router())
        .route("/api/health", axum::routing::get(health_check))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

/// Start the server with tracing initialised from `RUST_LOG`.
///
/// Returns the actual address the server is listening on.
pub async fn start_server(config: ServerConfig) -> Result<SocketAddr, String> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "taskgate_server=info,taskgate_core=info,tower_http=info".into()),
        )
        .try_init();

    tracing::info!("Starting taskgate server on {}:{}", config.host, config.port);

    let state = create_app_state(&config).await?;
    start_server_with_state(config, state).await
}

/// Start the HTTP server with a pre-built `AppState`.
pub async fn start_server_with_state(
    config: ServerConfig,
    state: AppState,
) -> Result<SocketAddr, String> {
    let app = build_app(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| format!("Invalid address: {}", e))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("Failed to bind to {}: {}", addr, e))?;

    let local_addr = listener
        .local_addr()
        .map_err(|e| format!("Failed to get local address: {}", e))?;

    tracing::info!("taskgate server listening on {}", local_addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("Server error: {}", e);
        }
    });

    Ok(local_addr)
}

async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "server": "taskgate-server",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
