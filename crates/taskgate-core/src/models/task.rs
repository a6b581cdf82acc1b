use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorBody;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    #[serde(rename = "submitted")]
    Submitted,
    #[serde(rename = "assigned")]
    Assigned,
    #[serde(rename = "working")]
    Working,
    #[serde(rename = "input-required")]
    InputRequired,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "failed")]
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Assigned => "assigned",
            Self::Working => "working",
            Self::InputRequired => "input-required",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "submitted" => Some(Self::Submitted),
            "assigned" => Some(Self::Assigned),
            "working" => Some(Self::Working),
            "input-required" => Some(Self::InputRequired),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

/// How a task is being executed once it has an agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum Dispatch {
    /// Not yet handed to an agent.
    #[default]
    Unassigned,
    /// Running in-process through a built-in handler.
    Builtin { handler: String },
    /// Acknowledged by an out-of-process agent; completion arrives via callback.
    #[serde(rename_all = "camelCase")]
    PendingExternal {
        endpoint: String,
        acknowledged_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub initiator_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub description: String,
    pub required_capabilities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_agent: Option<String>,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    #[serde(default)]
    pub context: serde_json::Value,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub dispatch: Dispatch,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    /// Status endpoint handed to an external agent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
    /// Submitter's URL, posted the task once it is terminal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notify_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl Task {
    pub fn new(id: String, request: &TaskRequest) -> Self {
        Self {
            id,
            initiator_id: request.initiator_id.clone(),
            title: request.title.clone(),
            description: request.description.clone(),
            required_capabilities: request.required_capabilities.clone(),
            assigned_agent: None,
            status: TaskStatus::Submitted,
            priority: request.priority,
            context: request.context.clone(),
            progress: 0,
            message: None,
            dispatch: Dispatch::Unassigned,
            created_at: Utc::now(),
            assigned_at: None,
            completed_at: None,
            result: None,
            error: None,
            callback_url: None,
            notify_url: request.notify_url.clone(),
            idempotency_key: request.idempotency_key.clone(),
        }
    }

    /// Milliseconds between assignment (or creation) and completion.
    pub fn response_time_ms(&self) -> f64 {
        let start = self.assigned_at.unwrap_or(self.created_at);
        let end = self.completed_at.unwrap_or_else(Utc::now);
        (end - start).num_milliseconds().max(0) as f64
    }
}

/// A delegation request handed to the router.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRequest {
    /// Caller-chosen task id; generated when absent.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub initiator_id: String,
    #[serde(default)]
    pub title: Option<String>,
    pub description: String,
    #[serde(default)]
    pub required_capabilities: Vec<String>,
    #[serde(default)]
    pub specialization: Option<String>,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default)]
    pub context: serde_json::Value,
    #[serde(default)]
    pub notify_url: Option<String>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

/// Error payload reported by an external agent: either structured or a bare message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ReportedError {
    Structured(ErrorBody),
    Message(String),
}

impl From<ReportedError> for ErrorBody {
    fn from(err: ReportedError) -> Self {
        match err {
            ReportedError::Structured(body) => body,
            ReportedError::Message(message) => ErrorBody::new("AGENT_REPORTED_ERROR", message),
        }
    }
}

/// A partial update merged into an existing task (status callbacks).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusPatch {
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub progress: Option<u8>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<ReportedError>,
    #[serde(default)]
    pub assignee: Option<String>,
}

impl StatusPatch {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!TaskStatus::Submitted.is_terminal());
        assert!(!TaskStatus::InputRequired.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
    }

    #[test]
    fn test_status_serializes_kebab() {
        let json = serde_json::to_value(TaskStatus::InputRequired).unwrap();
        assert_eq!(json, "input-required");
        assert_eq!(TaskStatus::from_str("input-required"), Some(TaskStatus::InputRequired));
    }

    #[test]
    fn test_patch_accepts_string_or_structured_error() {
        let patch: StatusPatch = serde_json::from_value(serde_json::json!({
            "status": "failed",
            "error": "upstream timeout"
        }))
        .unwrap();
        let body: ErrorBody = patch.error.unwrap().into();
        assert_eq!(body.code, "AGENT_REPORTED_ERROR");
        assert_eq!(body.message, "upstream timeout");

        let patch: StatusPatch = serde_json::from_value(serde_json::json!({
            "error": { "code": "CARD_DECLINED", "message": "declined" }
        }))
        .unwrap();
        let body: ErrorBody = patch.error.unwrap().into();
        assert_eq!(body.code, "CARD_DECLINED");
    }

    #[test]
    fn test_dispatch_tagging() {
        let json = serde_json::to_value(Dispatch::Builtin {
            handler: "payments".into(),
        })
        .unwrap();
        assert_eq!(json["mode"], "builtin");
        assert_eq!(json["handler"], "payments");
    }
}
