//! Run records: one `WorkflowRun` per execution, one `StepResult` per step.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::metrics::RunMetrics;
use crate::error::ErrorBody;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub step_id: String,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    /// When the first attempt began; `None` if the step never ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Number of tool invocations made (0 if the step never ran)
    pub attempts: u32,
    pub retry_count: u32,
    pub memory_delta_bytes: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl StepResult {
    /// Final record for a step that was never dispatched.
    pub fn not_run(step_id: &str, error: ErrorBody) -> Self {
        Self {
            step_id: step_id.to_string(),
            status: StepStatus::Failed,
            result: None,
            error: Some(error),
            started_at: None,
            finished_at: Utc::now(),
            duration_ms: 0,
            attempts: 0,
            retry_count: 0,
            memory_delta_bytes: 0,
            warnings: Vec::new(),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == StepStatus::Completed
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRun {
    pub run_id: String,
    pub workflow_id: String,
    pub status: RunStatus,
    pub step_results: BTreeMap<String, StepResult>,
    /// Step ids in the order they were dispatched
    pub execution_order: Vec<String>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<RunMetrics>,
}

impl WorkflowRun {
    pub fn new(run_id: String, workflow_id: String) -> Self {
        Self {
            run_id,
            workflow_id,
            status: RunStatus::Running,
            step_results: BTreeMap::new(),
            execution_order: Vec::new(),
            started_at: Utc::now(),
            ended_at: None,
            error: None,
            metrics: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status != RunStatus::Running
    }

    pub fn duration_ms(&self) -> u64 {
        let end = self.ended_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_milliseconds().max(0) as u64
    }
}
