//! Shared application state for the HTTP server and the CLI.

use std::sync::Arc;

use crate::config::GatewayConfig;
use crate::gateway::TaskGateway;
use crate::orchestration::AgentRouter;
use crate::tools::ToolInvoker;
use crate::workflow::WorkflowEngine;

/// Components wired together once at startup.
pub struct AppStateInner {
    pub config: GatewayConfig,
    pub router: Arc<AgentRouter>,
    pub engine: Arc<WorkflowEngine>,
    pub gateway: TaskGateway,
}

pub type AppState = Arc<AppStateInner>;

impl AppStateInner {
    /// Build every component around one Tool Invoker.
    pub fn new(config: GatewayConfig, tools: Arc<dyn ToolInvoker>) -> Self {
        let router = Arc::new(AgentRouter::new(config.router.clone(), Arc::clone(&tools)));
        let engine = Arc::new(WorkflowEngine::new(config.engine.clone(), tools));
        Self::from_parts(config, router, engine)
    }

    /// Assemble state from pre-built components (custom dispatcher, probe, ...).
    pub fn from_parts(
        config: GatewayConfig,
        router: Arc<AgentRouter>,
        engine: Arc<WorkflowEngine>,
    ) -> Self {
        let gateway = TaskGateway::new(
            config.gateway.clone(),
            Arc::clone(&router),
            Arc::clone(&engine),
        );
        Self {
            config,
            router,
            engine,
            gateway,
        }
    }
}
