//! Built-in agents: a closed set of specializations, each served by a handler
//! registered in a [`HandlerTable`] at startup.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ErrorBody;
use crate::models::task::Task;
use crate::tools::ToolInvoker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Specialization {
    Payments,
    SourceControl,
    Communications,
    TextGeneration,
}

impl Specialization {
    pub const ALL: [Specialization; 4] = [
        Self::Payments,
        Self::SourceControl,
        Self::Communications,
        Self::TextGeneration,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Payments => "payments",
            Self::SourceControl => "source_control",
            Self::Communications => "communications",
            Self::TextGeneration => "text_generation",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "payments" => Some(Self::Payments),
            "source_control" => Some(Self::SourceControl),
            "communications" => Some(Self::Communications),
            "text_generation" => Some(Self::TextGeneration),
            _ => None,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Payments => "Payments Agent",
            Self::SourceControl => "Source Control Agent",
            Self::Communications => "Communications Agent",
            Self::TextGeneration => "Text Generation Agent",
        }
    }

    /// Capabilities a built-in agent of this kind declares.
    pub fn default_capabilities(&self) -> &'static [&'static str] {
        match self {
            Self::Payments => &["payments", "refunds", "risk_calculation"],
            Self::SourceControl => &["source_control", "code_review", "issues"],
            Self::Communications => &["sms", "voice", "email"],
            Self::TextGeneration => &["text_generation", "summarization"],
        }
    }

    /// Tool the default handler invokes.
    pub fn tool_id(&self) -> &'static str {
        match self {
            Self::Payments => "payments.process",
            Self::SourceControl => "source_control.execute",
            Self::Communications => "communications.send",
            Self::TextGeneration => "text.generate",
        }
    }
}

/// Runs a task in-process on behalf of a built-in agent.
#[async_trait]
pub trait BuiltinHandler: Send + Sync {
    async fn handle(&self, task: &Task) -> Result<serde_json::Value, ErrorBody>;
}

/// Default handler: one Tool Invoker call per task.
///
/// Parameters are `context.params` when present (otherwise the whole context),
/// with the task description added under `description`.
pub struct ToolHandler {
    tool_id: String,
    tools: Arc<dyn ToolInvoker>,
}

impl ToolHandler {
    pub fn new(tool_id: impl Into<String>, tools: Arc<dyn ToolInvoker>) -> Self {
        Self {
            tool_id: tool_id.into(),
            tools,
        }
    }
}

#[async_trait]
impl BuiltinHandler for ToolHandler {
    async fn handle(&self, task: &Task) -> Result<serde_json::Value, ErrorBody> {
        let source = task.context.get("params").unwrap_or(&task.context);
        let mut params = match source {
            serde_json::Value::Object(map) => map.clone(),
            _ => serde_json::Map::new(),
        };
        params
            .entry("description")
            .or_insert_with(|| serde_json::Value::String(task.description.clone()));

        self.tools
            .execute(&self.tool_id, &serde_json::Value::Object(params))
            .await
            .map_err(|e| ErrorBody::new(e.code(), e.to_string()))
    }
}

/// Specialization → handler, fixed once the router is built.
#[derive(Clone, Default)]
pub struct HandlerTable {
    handlers: HashMap<Specialization, Arc<dyn BuiltinHandler>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// A [`ToolHandler`] for every specialization.
    pub fn with_tools(tools: Arc<dyn ToolInvoker>) -> Self {
        let mut table = Self::new();
        for spec in Specialization::ALL {
            table.register(spec, Arc::new(ToolHandler::new(spec.tool_id(), Arc::clone(&tools))));
        }
        table
    }

    pub fn register(&mut self, specialization: Specialization, handler: Arc<dyn BuiltinHandler>) {
        self.handlers.insert(specialization, handler);
    }

    pub fn get(&self, specialization: Specialization) -> Option<Arc<dyn BuiltinHandler>> {
        self.handlers.get(&specialization).cloned()
    }

    pub fn specializations(&self) -> Vec<Specialization> {
        Specialization::ALL
            .into_iter()
            .filter(|s| self.handlers.contains_key(s))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::task::TaskRequest;
    use crate::tools::{FnTool, ToolError, ToolRegistry};

    #[test]
    fn test_specialization_round_trip_names() {
        for spec in Specialization::ALL {
            assert_eq!(Specialization::from_str(spec.as_str()), Some(spec));
        }
        assert_eq!(Specialization::from_str("astrology"), None);
    }

    #[tokio::test]
    async fn test_tool_handler_passes_params_and_description() {
        let mut registry = ToolRegistry::new();
        registry.register(
            "communications.send",
            FnTool::new(|params| Box::pin(async move { Ok(params) })),
        );
        let table = HandlerTable::with_tools(Arc::new(registry));
        let task = Task::new(
            "t1".into(),
            &TaskRequest {
                description: "text the courier".into(),
                context: serde_json::json!({ "params": { "to": "+15550100" } }),
                ..Default::default()
            },
        );

        let handler = table.get(Specialization::Communications).unwrap();
        let result = handler.handle(&task).await.unwrap();
        assert_eq!(result["to"], "+15550100");
        assert_eq!(result["description"], "text the courier");
    }

    #[tokio::test]
    async fn test_tool_failure_becomes_error_body() {
        let mut registry = ToolRegistry::new();
        registry.register(
            "payments.process",
            FnTool::new(|_params| {
                Box::pin(async move { Err(ToolError::Failed("card declined".into())) })
            }),
        );
        let table = HandlerTable::with_tools(Arc::new(registry));
        let task = Task::new("t1".into(), &TaskRequest::default());

        let err = table
            .get(Specialization::Payments)
            .unwrap()
            .handle(&task)
            .await
            .unwrap_err();
        assert_eq!(err.code, "TOOL_FAILED");
        assert_eq!(err.message, "card declined");
    }
}
