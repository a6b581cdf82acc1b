use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use super::{ToolError, ToolInvoker};

/// A single in-process tool.
#[async_trait]
pub trait Tool: Send + Sync {
    async fn call(&self, params: &serde_json::Value) -> Result<serde_json::Value, ToolError>;
}

pub type ToolFuture = Pin<Box<dyn Future<Output = Result<serde_json::Value, ToolError>> + Send>>;

/// Adapts an async closure into a [`Tool`].
pub struct FnTool<F> {
    f: F,
}

impl<F> FnTool<F>
where
    F: Fn(serde_json::Value) -> ToolFuture + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> Tool for FnTool<F>
where
    F: Fn(serde_json::Value) -> ToolFuture + Send + Sync,
{
    async fn call(&self, params: &serde_json::Value) -> Result<serde_json::Value, ToolError> {
        (self.f)(params.clone()).await
    }
}

/// Tools looked up by id and executed in-process.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the diagnostic `echo` tool.
    pub fn with_builtin_tools() -> Self {
        let mut registry = Self::new();
        registry.register(
            "echo",
            FnTool::new(|params| Box::pin(async move { Ok(params) })),
        );
        registry
    }

    pub fn register(&mut self, tool_id: impl Into<String>, tool: impl Tool + 'static) {
        self.tools.insert(tool_id.into(), Arc::new(tool));
    }
}

#[async_trait]
impl ToolInvoker for ToolRegistry {
    async fn execute(
        &self,
        tool_id: &str,
        params: &serde_json::Value,
    ) -> Result<serde_json::Value, ToolError> {
        let tool = self
            .tools
            .get(tool_id)
            .cloned()
            .ok_or_else(|| ToolError::NotFound(tool_id.to_string()))?;
        tool.call(params).await
    }
}
