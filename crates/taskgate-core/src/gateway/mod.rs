//! TaskGateway - the single entry point for task submissions.
//!
//! A submission whose description mentions a workflow keyword and names a
//! registered workflow (or that sets `params.workflowId`) is started on the
//! workflow engine. Everything else is delegated to an agent by the router.
//! Polling returns a snapshot tagged with which of the two handled it.
//!
//! Task ids and run ids share one namespace. Every entry point that accepts
//! a caller-chosen id goes through the admission lock here.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::config::GatewaySettings;
use crate::error::GatewayError;
use crate::models::task::{Task, TaskPriority, TaskRequest};
use crate::orchestration::{AgentRouter, Delegation};
use crate::workflow::{WorkflowEngine, WorkflowRun};

/// Inbound task submission.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSubmission {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub initiator_id: String,
    #[serde(default)]
    pub title: Option<String>,
    pub description: String,
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default)]
    pub priority: Option<TaskPriority>,
    #[serde(default)]
    pub callback_url: Option<String>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

/// A polled record, discriminated by `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskSnapshot {
    AgentTask(Task),
    WorkflowExecution(WorkflowRun),
}

impl TaskSnapshot {
    pub fn id(&self) -> &str {
        match self {
            Self::AgentTask(task) => &task.id,
            Self::WorkflowExecution(run) => &run.run_id,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Submitted {
    pub snapshot: TaskSnapshot,
    pub replayed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Workflow(String),
    Agent,
}

/// State guarded by the admission lock.
#[derive(Default)]
struct Admission {
    /// idempotency key → run id, for submissions handed to the engine
    workflow_keys: HashMap<String, String>,
    /// caller-chosen ids of agent submissions still being delegated
    pending_tasks: HashMap<String, usize>,
}

pub struct TaskGateway {
    settings: GatewaySettings,
    router: Arc<AgentRouter>,
    engine: Arc<WorkflowEngine>,
    admission: Mutex<Admission>,
}

impl TaskGateway {
    pub fn new(
        settings: GatewaySettings,
        router: Arc<AgentRouter>,
        engine: Arc<WorkflowEngine>,
    ) -> Self {
        Self {
            settings,
            router,
            engine,
            admission: Mutex::new(Admission::default()),
        }
    }

    /// Decide who handles a submission.
    pub async fn route(&self, submission: &TaskSubmission) -> Route {
        if let Some(id) = submission.params.get("workflowId").and_then(|v| v.as_str()) {
            return Route::Workflow(id.to_string());
        }

        let description = submission.description.to_lowercase();
        let mentions_keyword = self
            .settings
            .workflow_keywords
            .iter()
            .any(|k| description.contains(&k.to_lowercase()));
        if !mentions_keyword {
            return Route::Agent;
        }

        self.engine
            .list_definitions()
            .await
            .into_iter()
            .map(|def| def.id.clone())
            .find(|id| contains_word(&description, &id.to_lowercase()))
            .map(Route::Workflow)
            .unwrap_or(Route::Agent)
    }

    pub async fn submit(&self, submission: TaskSubmission) -> Result<Submitted, GatewayError> {
        if submission.description.trim().is_empty() {
            return Err(GatewayError::Validation("Task description is required".into()));
        }

        match self.route(&submission).await {
            Route::Workflow(workflow_id) => self.submit_workflow(submission, &workflow_id).await,
            Route::Agent => self.submit_agent(submission).await,
        }
    }

    async fn submit_workflow(
        &self,
        submission: TaskSubmission,
        workflow_id: &str,
    ) -> Result<Submitted, GatewayError> {
        tracing::info!("[Gateway] Routing submission to workflow '{}'", workflow_id);
        let (run, replayed) = self
            .admit_run(workflow_id, submission.id, submission.idempotency_key)
            .await?;
        Ok(Submitted {
            snapshot: TaskSnapshot::WorkflowExecution(run),
            replayed,
        })
    }

    /// Start a registered workflow, keeping run ids clear of task ids.
    pub async fn start_workflow(
        &self,
        workflow_id: &str,
        run_id: Option<String>,
    ) -> Result<WorkflowRun, GatewayError> {
        let (run, _) = self.admit_run(workflow_id, run_id, None).await?;
        Ok(run)
    }

    /// A repeated `idempotency_key` returns the run it started, for as long
    /// as the engine still holds that run.
    async fn admit_run(
        &self,
        workflow_id: &str,
        run_id: Option<String>,
        idempotency_key: Option<String>,
    ) -> Result<(WorkflowRun, bool), GatewayError> {
        let mut admission = self.admission.lock().await;

        if let Some(key) = &idempotency_key {
            if let Some(existing) = admission.workflow_keys.get(key).cloned() {
                match self.engine.run_snapshot(&existing).await {
                    Some(run) => return Ok((run, true)),
                    None => {
                        admission.workflow_keys.remove(key);
                    }
                }
            }
        }

        if let Some(id) = &run_id {
            let delegating = admission.pending_tasks.contains_key(id);
            if delegating || self.router.get_task(id).await?.is_some() {
                return Err(GatewayError::Conflict(format!("Task {} already exists", id)));
            }
        }

        let run = self.engine.start(workflow_id, run_id).await?;
        if let Some(key) = idempotency_key {
            admission.workflow_keys.insert(key, run.run_id.clone());
            self.prune_workflow_keys(&mut admission).await;
        }
        Ok((run, false))
    }

    /// Forget keys whose runs the engine has archived away.
    async fn prune_workflow_keys(&self, admission: &mut Admission) {
        if admission.workflow_keys.len() <= self.engine.config().run_archive_limit {
            return;
        }
        let live = self.engine.run_ids().await;
        admission
            .workflow_keys
            .retain(|_, run_id| live.contains(run_id));
    }

    async fn submit_agent(&self, submission: TaskSubmission) -> Result<Submitted, GatewayError> {
        let required_capabilities = match submission
            .params
            .get("requiredCapabilities")
            .and_then(|v| v.as_array())
        {
            Some(list) => list
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect(),
            None => self.infer_capabilities(&submission.description).await,
        };
        if required_capabilities.is_empty() {
            return Err(GatewayError::NoCapableAgent(Vec::new()));
        }

        let reserved = submission.id.clone();
        if let Some(id) = &reserved {
            let mut admission = self.admission.lock().await;
            if self.engine.run_snapshot(id).await.is_some() {
                return Err(GatewayError::Conflict(format!("Task {} already exists", id)));
            }
            *admission.pending_tasks.entry(id.clone()).or_insert(0) += 1;
        }

        let delegation = self.delegate(submission, required_capabilities).await;

        if let Some(id) = reserved {
            let mut admission = self.admission.lock().await;
            if let Some(count) = admission.pending_tasks.get_mut(&id) {
                *count -= 1;
                if *count == 0 {
                    admission.pending_tasks.remove(&id);
                }
            }
        }

        let delegation = delegation?;
        Ok(Submitted {
            snapshot: TaskSnapshot::AgentTask(delegation.task),
            replayed: delegation.replayed,
        })
    }

    async fn delegate(
        &self,
        submission: TaskSubmission,
        required_capabilities: Vec<String>,
    ) -> Result<Delegation, GatewayError> {
        let specialization = submission
            .params
            .get("specialization")
            .and_then(|v| v.as_str())
            .map(String::from);

        let request = TaskRequest {
            id: submission.id,
            initiator_id: submission.initiator_id,
            title: submission.title,
            description: submission.description,
            required_capabilities,
            specialization,
            priority: submission.priority.unwrap_or_default(),
            context: serde_json::json!({ "params": submission.params }),
            idempotency_key: submission.idempotency_key,
            notify_url: submission.callback_url,
        };

        self.router.delegate(request).await
    }

    /// Known capability names that appear as words in the description.
    ///
    /// `risk_calculation` also matches "risk calculation".
    async fn infer_capabilities(&self, description: &str) -> Vec<String> {
        let description = description.to_lowercase();
        self.router
            .known_capabilities()
            .await
            .into_iter()
            .filter(|cap| {
                let cap = cap.to_lowercase();
                contains_word(&description, &cap) || contains_word(&description, &cap.replace('_', " "))
            })
            .collect()
    }

    /// Current agent task or workflow run with this id.
    pub async fn get(&self, id: &str) -> Result<Option<TaskSnapshot>, GatewayError> {
        if let Some(task) = self.router.get_task(id).await? {
            return Ok(Some(TaskSnapshot::AgentTask(task)));
        }
        Ok(self
            .engine
            .run_snapshot(id)
            .await
            .map(TaskSnapshot::WorkflowExecution))
    }
}

/// Whole-word (or whole-phrase) containment on already lowercased text.
fn contains_word(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    let is_word = |c: char| c.is_alphanumeric() || c == '_' || c == '-';
    haystack.match_indices(needle).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + needle.len()..].chars().next();
        !before.is_some_and(is_word) && !after.is_some_and(is_word)
    })
}
