//! CLI command implementations.
//!
//! Each submodule corresponds to a top-level CLI command and reuses the
//! taskgate-core domain logic directly.

pub mod server;
pub mod workflow;

use std::sync::Arc;

use taskgate_core::tools::{HttpToolInvoker, ToolInvoker, ToolRegistry};
use taskgate_core::GatewayConfig;

/// Load a gateway config file, or the defaults when none is given.
pub fn load_config(path: Option<&str>) -> Result<GatewayConfig, String> {
    match path {
        Some(path) => GatewayConfig::from_file(path).map_err(|e| e.to_string()),
        None => Ok(GatewayConfig::default()),
    }
}

/// HTTP tool invoker when a URL is given, otherwise the in-process registry.
pub fn tool_invoker(tools_url: Option<&str>) -> Arc<dyn ToolInvoker> {
    match tools_url {
        Some(url) => {
            tracing::info!("Forwarding tool calls to {}", url);
            Arc::new(HttpToolInvoker::new(url))
        }
        None => {
            tracing::debug!("Using the in-process tool registry");
            Arc::new(ToolRegistry::with_builtin_tools())
        }
    }
}

/// Pretty-print a JSON value to stdout.
pub fn print_json(value: &serde_json::Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
    );
}
