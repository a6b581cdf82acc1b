use std::collections::{BTreeSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::task::TaskStatus;

/// Maximum number of entries kept in an agent's task history.
pub const TASK_HISTORY_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AgentStatus {
    #[serde(rename = "active")]
    Active,
    #[serde(rename = "inactive")]
    Inactive,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
        }
    }
}

/// Running performance figures, updated in O(1) per finished task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    pub tasks_completed: u64,
    pub average_response_time_ms: f64,
    pub success_rate_percent: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_task_time: Option<DateTime<Utc>>,
}

impl Default for PerformanceMetrics {
    fn default() -> Self {
        Self {
            tasks_completed: 0,
            average_response_time_ms: 0.0,
            success_rate_percent: 100.0,
            last_task_time: None,
        }
    }
}

impl PerformanceMetrics {
    /// Fold one finished task into the running averages.
    ///
    /// Both averages are weighted by the previous count, so the full history
    /// is never rescanned.
    pub fn record(&mut self, success: bool, response_time_ms: f64, at: DateTime<Utc>) {
        let previous = self.tasks_completed as f64;
        let outcome = if success { 100.0 } else { 0.0 };

        self.average_response_time_ms =
            (self.average_response_time_ms * previous + response_time_ms) / (previous + 1.0);
        self.success_rate_percent =
            (self.success_rate_percent * previous + outcome) / (previous + 1.0);
        self.tasks_completed += 1;
        self.last_task_time = Some(at);
    }

    /// Ranking score: `successRate × 0.7 + (100 − avgResponseMs/1000) × 0.3`.
    pub fn score(&self) -> f64 {
        self.success_rate_percent * 0.7 + (100.0 - self.average_response_time_ms / 1000.0) * 0.3
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskHistoryEntry {
    pub task_id: String,
    pub status: TaskStatus,
    pub response_time_ms: f64,
    pub finished_at: DateTime<Utc>,
}

/// Bounded ring buffer of the most recent finished tasks.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct TaskHistory(VecDeque<TaskHistoryEntry>);

impl TaskHistory {
    pub fn push(&mut self, entry: TaskHistoryEntry) {
        if self.0.len() == TASK_HISTORY_LIMIT {
            self.0.pop_front();
        }
        self.0.push_back(entry);
    }

    pub fn iter(&self) -> impl Iterator<Item = &TaskHistoryEntry> {
        self.0.iter()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub specialization: String,
    pub capabilities: BTreeSet<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    pub status: AgentStatus,
    pub is_built_in: bool,
    pub performance_metrics: PerformanceMetrics,
    #[serde(default)]
    pub task_history: TaskHistory,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Agent {
    pub fn new(
        id: String,
        name: String,
        specialization: String,
        capabilities: BTreeSet<String>,
        endpoint: Option<String>,
        is_built_in: bool,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            name,
            specialization,
            capabilities,
            endpoint,
            status: AgentStatus::Active,
            is_built_in,
            performance_metrics: PerformanceMetrics::default(),
            task_history: TaskHistory::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == AgentStatus::Active
    }

    pub fn has_capabilities(&self, required: &[String]) -> bool {
        required.iter().all(|c| self.capabilities.contains(c))
    }
}

/// Inbound registration request for an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRegistration {
    pub name: String,
    #[serde(default)]
    pub specialization: Option<String>,
    pub capabilities: Vec<String>,
    pub endpoint: String,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}
