//! Outbound delegation to agents running out of process.
//!
//! The dispatcher only waits for the agent's acknowledgement. The task's
//! outcome arrives later through the status callback.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::task::{Task, TaskPriority};

/// Body of `POST {endpoint}/tasks`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundTask {
    pub id: String,
    pub initiator_id: String,
    pub description: String,
    pub params: serde_json::Value,
    pub priority: TaskPriority,
    pub callback_url: String,
    pub metadata: serde_json::Value,
}

impl OutboundTask {
    pub fn from_task(task: &Task, callback_url: String) -> Self {
        let params = task
            .context
            .get("params")
            .cloned()
            .unwrap_or_else(|| serde_json::json!({}));
        Self {
            id: task.id.clone(),
            initiator_id: task.initiator_id.clone(),
            description: task.description.clone(),
            params,
            priority: task.priority,
            callback_url,
            metadata: serde_json::json!({
                "title": task.title,
                "requiredCapabilities": task.required_capabilities,
                "assignedAgent": task.assigned_agent,
                "createdAt": task.created_at,
            }),
        }
    }
}

#[async_trait]
pub trait ExternalDispatcher: Send + Sync {
    /// Submit a task; `Ok` means the agent acknowledged it with a 2xx.
    async fn submit(&self, endpoint: &str, task: &OutboundTask) -> Result<(), String>;

    /// Post a finished task to the submitter's notification URL.
    async fn notify(&self, url: &str, task: &Task) -> Result<(), String>;
}

/// Posts tasks to agents over HTTP with `reqwest`.
pub struct HttpDispatcher {
    client: reqwest::Client,
}

impl HttpDispatcher {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(timeout_secs))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }

    pub fn tasks_url(endpoint: &str) -> String {
        format!("{}/tasks", endpoint.trim_end_matches('/'))
    }
}

#[async_trait]
impl ExternalDispatcher for HttpDispatcher {
    async fn submit(&self, endpoint: &str, task: &OutboundTask) -> Result<(), String> {
        let url = Self::tasks_url(endpoint);
        let response = self
            .client
            .post(&url)
            .json(task)
            .send()
            .await
            .map_err(|e| format!("POST {} failed: {}", url, e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(format!("POST {} returned {}: {}", url, status, body))
    }

    async fn notify(&self, url: &str, task: &Task) -> Result<(), String> {
        let response = self
            .client
            .post(url)
            .json(task)
            .send()
            .await
            .map_err(|e| format!("POST {} failed: {}", url, e))?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(format!("POST {} returned {}", url, status))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::task::TaskRequest;

    #[test]
    fn test_tasks_url_trims_slash() {
        assert_eq!(HttpDispatcher::tasks_url("http://agent:9000/"), "http://agent:9000/tasks");
        assert_eq!(HttpDispatcher::tasks_url("http://agent:9000"), "http://agent:9000/tasks");
    }

    #[test]
    fn test_outbound_payload_shape() {
        let task = Task::new(
            "t1".into(),
            &TaskRequest {
                initiator_id: "ops".into(),
                description: "send sms".into(),
                context: serde_json::json!({ "params": { "to": "+1555" } }),
                ..Default::default()
            },
        );
        let out = OutboundTask::from_task(&task, "http://gw/api/tasks/t1/status".into());
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["id"], "t1");
        assert_eq!(json["initiatorId"], "ops");
        assert_eq!(json["params"]["to"], "+1555");
        assert_eq!(json["priority"], "normal");
        assert_eq!(json["callbackUrl"], "http://gw/api/tasks/t1/status");
    }

    #[tokio::test]
    async fn test_unreachable_agent_is_an_error() {
        let dispatcher = HttpDispatcher::new(2);
        let task = Task::new("t1".into(), &TaskRequest::default());
        let out = OutboundTask::from_task(&task, String::new());
        let err = dispatcher.submit("http://127.0.0.1:1", &out).await.unwrap_err();
        assert!(err.contains("http://127.0.0.1:1/tasks"));

        let err = dispatcher.notify("http://127.0.0.1:1/hooks", &task).await.unwrap_err();
        assert!(err.contains("http://127.0.0.1:1/hooks"));
    }
}
