//! HTTP tool invoker: forwards tool calls to a remote tool host.
//!
//! POST {base_url}/tools/{toolId}
//! Body: the parameter bag as JSON
//! 2xx: the response body is the tool result
//! otherwise: a `ToolError::Failed` carrying status and body text

use async_trait::async_trait;

use super::{ToolError, ToolInvoker};

pub struct HttpToolInvoker {
    client: reqwest::Client,
    base_url: String,
}

impl HttpToolInvoker {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn url_for(&self, tool_id: &str) -> String {
        format!(
            "{}/tools/{}",
            self.base_url.trim_end_matches('/'),
            urlencoding::encode(tool_id)
        )
    }
}

#[async_trait]
impl ToolInvoker for HttpToolInvoker {
    async fn execute(
        &self,
        tool_id: &str,
        params: &serde_json::Value,
    ) -> Result<serde_json::Value, ToolError> {
        let url = self.url_for(tool_id);
        tracing::debug!("[HttpToolInvoker] Calling {}", url);

        let response = self
            .client
            .post(&url)
            .json(params)
            .send()
            .await
            .map_err(|e| ToolError::Transport(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ToolError::Transport(format!("Failed to read response body: {}", e)))?;

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ToolError::NotFound(tool_id.to_string()));
        }
        if !status.is_success() {
            return Err(ToolError::Failed(format!(
                "Tool host returned {}: {}",
                status, body
            )));
        }

        if body.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_str(&body)
            .map_err(|e| ToolError::Failed(format!("Failed to parse tool result JSON: {}", e)))
    }
}
