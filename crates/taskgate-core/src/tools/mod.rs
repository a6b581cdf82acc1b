//! Tool Invoker boundary: the only way the core talks to concrete systems.
//!
//! Both the workflow engine and the built-in agent handlers call tools through
//! [`ToolInvoker`]: a tool id plus a JSON parameter bag in, a JSON result or a
//! typed [`ToolError`] out. Nothing here knows a tool's internal protocol.
//!
//! Two invokers ship with the crate:
//!   1. [`ToolRegistry`]     - in-process tools registered by id
//!   2. [`HttpToolInvoker`]  - forwards calls to `POST {base}/tools/{toolId}`

pub mod http;
pub mod registry;

use async_trait::async_trait;

pub use http::HttpToolInvoker;
pub use registry::{FnTool, Tool, ToolRegistry};

#[derive(Debug, Clone, thiserror::Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    NotFound(String),

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("{0}")]
    Failed(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl ToolError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "TOOL_NOT_FOUND",
            Self::InvalidParams(_) => "INVALID_PARAMS",
            Self::Failed(_) => "TOOL_FAILED",
            Self::Transport(_) => "TOOL_TRANSPORT_ERROR",
        }
    }
}

/// Executes a named tool with a parameter bag.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn execute(
        &self,
        tool_id: &str,
        params: &serde_json::Value,
    ) -> Result<serde_json::Value, ToolError>;
}
