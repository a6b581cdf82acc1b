//! Core error type for taskgate.
//!
//! `GatewayError` is used throughout the core domain (engine, router, gateway).
//! Every variant carries a machine-readable code so callers never need to
//! parse the message. When the `axum` feature is enabled, it also implements
//! `IntoResponse` so it can be used directly as an axum handler error type.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    /// Malformed workflow or task definition; never retried.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("No capable agent for capabilities [{}]", .0.join(", "))]
    NoCapableAgent(Vec<String>),

    #[error("Step '{step_id}' failed: {message}")]
    StepExecution { step_id: String, message: String },

    #[error("Step '{step_id}' is blocked by failed dependency '{dependency}'")]
    BlockedByFailedDependency { step_id: String, dependency: String },

    /// Consistency check: nothing is ready, nothing failed, yet steps remain.
    #[error("Workflow stalled: {0}")]
    WorkflowStalled(String),

    #[error("Submission to external agent '{agent_id}' failed: {message}")]
    ExternalSubmissionFailed { agent_id: String, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::NoCapableAgent(_) => "NO_CAPABLE_AGENT",
            Self::StepExecution { .. } => "STEP_EXECUTION_ERROR",
            Self::BlockedByFailedDependency { .. } => "BLOCKED_BY_FAILED_DEPENDENCY",
            Self::WorkflowStalled(_) => "WORKFLOW_STALLED",
            Self::ExternalSubmissionFailed { .. } => "EXTERNAL_SUBMISSION_FAILED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody::new(self.code(), self.to_string())
    }
}

/// The `{code, message}` pair attached to every terminal failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl ErrorBody {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// axum integration (opt-in via feature flag)
// ---------------------------------------------------------------------------

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for GatewayError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        let status = match &self {
            GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
            GatewayError::NoCapableAgent(_) => StatusCode::UNPROCESSABLE_ENTITY,
            GatewayError::StepExecution { .. }
            | GatewayError::BlockedByFailedDependency { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            GatewayError::ExternalSubmissionFailed { .. } => StatusCode::BAD_GATEWAY,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::Conflict(_) => StatusCode::CONFLICT,
            GatewayError::WorkflowStalled(_) | GatewayError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = serde_json::json!({ "error": self.to_body() });
        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(GatewayError::Validation("x".into()).code(), "VALIDATION_ERROR");
        assert_eq!(
            GatewayError::NoCapableAgent(vec!["sms".into()]).code(),
            "NO_CAPABLE_AGENT"
        );
        assert_eq!(
            GatewayError::ExternalSubmissionFailed {
                agent_id: "a".into(),
                message: "refused".into()
            }
            .code(),
            "EXTERNAL_SUBMISSION_FAILED"
        );
    }

    #[test]
    fn test_body_carries_message() {
        let err = GatewayError::NoCapableAgent(vec!["sms".into(), "voice".into()]);
        let body = err.to_body();
        assert_eq!(body.code, "NO_CAPABLE_AGENT");
        assert_eq!(body.message, "No capable agent for capabilities [sms, voice]");
    }
}
