//! AgentRouter - agent registry, discovery and task delegation.
//!
//! The router exclusively owns agent and task records:
//!   1. Agents register (idempotently) and are indexed by capability
//!   2. Discovery intersects the index and ranks active candidates
//!   3. Delegation picks the best candidate and creates the task record
//!   4. Built-in agents run the task in-process through the handler table
//!   5. External agents get the task over HTTP and report back via callback
//!   6. Terminal status updates fold into the agent's performance metrics
//!
//! Callers only ever receive cloned snapshots.

pub mod discovery;
pub mod external;
pub mod handlers;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::config::RouterConfig;
use crate::error::{ErrorBody, GatewayError};
use crate::models::agent::{Agent, AgentRegistration, AgentStatus};
use crate::models::task::{Dispatch, ReportedError, StatusPatch, Task, TaskRequest, TaskStatus};
use crate::store::{AgentStore, Insert, Registered, TaskStore};
use crate::tools::ToolInvoker;

pub use external::{ExternalDispatcher, HttpDispatcher, OutboundTask};
pub use handlers::{BuiltinHandler, HandlerTable, Specialization, ToolHandler};

/// Result of [`AgentRouter::delegate`].
#[derive(Debug, Clone)]
pub struct Delegation {
    pub task: Task,
    /// True when the idempotency key matched an existing task.
    pub replayed: bool,
}

/// Optional filters for task listing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskFilter {
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub status: Option<TaskStatus>,
}

pub struct AgentRouter {
    config: RouterConfig,
    agents: AgentStore,
    tasks: TaskStore,
    handlers: HandlerTable,
    dispatcher: Arc<dyn ExternalDispatcher>,
    discovery_permits: Option<Arc<Semaphore>>,
}

impl AgentRouter {
    pub fn new(config: RouterConfig, tools: Arc<dyn ToolInvoker>) -> Self {
        let dispatcher = Arc::new(HttpDispatcher::new(config.external_timeout_secs));
        let discovery_permits = config
            .max_concurrent_discoveries
            .map(|n| Arc::new(Semaphore::new(n.max(1))));
        Self {
            handlers: HandlerTable::with_tools(tools),
            agents: AgentStore::new(),
            tasks: TaskStore::new(),
            dispatcher,
            discovery_permits,
            config,
        }
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn ExternalDispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn with_handlers(mut self, handlers: HandlerTable) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    // ─── Agents ───────────────────────────────────────────────────────────

    pub async fn register_agent(&self, reg: AgentRegistration) -> Result<Registered, GatewayError> {
        self.agents.register(&reg).await
    }

    /// Seed one built-in agent per specialization in the handler table.
    ///
    /// Agents that already exist are left untouched, metrics included.
    pub async fn register_builtin_agents(&self) -> Result<Vec<Agent>, GatewayError> {
        let mut seeded = Vec::new();
        for spec in self.handlers.specializations() {
            let id = format!("builtin-{}", spec.as_str());
            if let Some(existing) = self.agents.get(&id).await? {
                seeded.push(existing);
                continue;
            }
            let capabilities: BTreeSet<String> = spec
                .default_capabilities()
                .iter()
                .map(|c| c.to_string())
                .collect();
            let agent = Agent::new(
                id,
                spec.display_name().to_string(),
                spec.as_str().to_string(),
                capabilities,
                None,
                true,
            );
            self.agents.save(&agent).await?;
            tracing::info!("[Router] Built-in agent {} ready", agent.id);
            seeded.push(agent);
        }
        Ok(seeded)
    }

    pub async fn get_agent(&self, agent_id: &str) -> Result<Option<Agent>, GatewayError> {
        self.agents.get(agent_id).await
    }

    pub async fn list_agents(&self) -> Result<Vec<Agent>, GatewayError> {
        self.agents.list().await
    }

    /// Mark inactive; the agent stays in the registry but leaves the index.
    pub async fn deactivate_agent(&self, agent_id: &str) -> Result<Agent, GatewayError> {
        let agent = self.agents.set_status(agent_id, AgentStatus::Inactive).await?;
        tracing::info!("[Router] Agent {} deactivated", agent_id);
        Ok(agent)
    }

    pub async fn activate_agent(&self, agent_id: &str) -> Result<Agent, GatewayError> {
        let agent = self.agents.set_status(agent_id, AgentStatus::Active).await?;
        tracing::info!("[Router] Agent {} activated", agent_id);
        Ok(agent)
    }

    pub async fn update_capabilities(
        &self,
        agent_id: &str,
        capabilities: Vec<String>,
    ) -> Result<Agent, GatewayError> {
        let capabilities: BTreeSet<String> = capabilities
            .into_iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();
        if capabilities.is_empty() {
            return Err(GatewayError::Validation(
                "Agent must declare at least one capability".into(),
            ));
        }
        self.agents.update_capabilities(agent_id, capabilities).await
    }

    pub async fn known_capabilities(&self) -> Vec<String> {
        self.agents.known_capabilities().await
    }

    // ─── Discovery ────────────────────────────────────────────────────────

    /// Active agents declaring all `capabilities`, best first.
    pub async fn discover(
        &self,
        capabilities: &[String],
        specialization: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<Agent>, GatewayError> {
        let _permit = match &self.discovery_permits {
            Some(permits) => Some(permits.acquire().await.map_err(|e| {
                GatewayError::Internal(format!("Discovery limiter closed: {}", e))
            })?),
            None => None,
        };

        let candidates = self.agents.candidates(capabilities).await?;
        let limit = limit.unwrap_or(self.config.discovery_limit);
        Ok(discovery::rank(candidates, specialization, limit))
    }

    // ─── Delegation ───────────────────────────────────────────────────────

    /// Create a task for the best matching agent and start it.
    ///
    /// A repeated idempotency key returns the existing task untouched.
    pub async fn delegate(&self, request: TaskRequest) -> Result<Delegation, GatewayError> {
        if request.description.trim().is_empty() {
            return Err(GatewayError::Validation("Task description is required".into()));
        }

        if let Some(key) = &request.idempotency_key {
            if let Some(existing) = self.tasks.find_by_key(key).await? {
                tracing::info!("[Router] Idempotent replay of task {} (key {})", existing.id, key);
                return Ok(Delegation {
                    task: existing,
                    replayed: true,
                });
            }
        }

        let agent = self
            .discover(
                &request.required_capabilities,
                request.specialization.as_deref(),
                Some(1),
            )
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::NoCapableAgent(request.required_capabilities.clone()))?;

        let id = request
            .id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let mut task = Task::new(id, &request);
        task.assigned_agent = Some(agent.id.clone());

        let task = match self.tasks.insert(task).await? {
            Insert::Replayed(existing) => {
                return Ok(Delegation {
                    task: existing,
                    replayed: true,
                })
            }
            Insert::Created(task) => task,
        };
        tracing::info!(
            "[Router] Task {} delegated to {} ({})",
            task.id,
            agent.id,
            if agent.is_built_in { "built-in" } else { "external" }
        );

        self.tasks
            .update(&task.id, |t| {
                t.status = TaskStatus::Assigned;
                t.assigned_at = Some(Utc::now());
            })
            .await?;

        let task = if agent.is_built_in {
            self.run_builtin(&task.id, &agent).await?
        } else {
            self.run_external(&task.id, &agent).await?
        };

        Ok(Delegation {
            task,
            replayed: false,
        })
    }

    async fn run_builtin(&self, task_id: &str, agent: &Agent) -> Result<Task, GatewayError> {
        let Some(spec) = Specialization::from_str(&agent.specialization) else {
            return self
                .fail_task(
                    task_id,
                    ErrorBody::new(
                        "NO_HANDLER",
                        format!("No built-in handler for '{}'", agent.specialization),
                    ),
                )
                .await;
        };
        let Some(handler) = self.handlers.get(spec) else {
            return self
                .fail_task(
                    task_id,
                    ErrorBody::new("NO_HANDLER", format!("No handler registered for '{}'", spec.as_str())),
                )
                .await;
        };

        let task = self
            .tasks
            .update(task_id, |t| {
                t.status = TaskStatus::Working;
                t.dispatch = Dispatch::Builtin {
                    handler: spec.as_str().to_string(),
                };
                t.clone()
            })
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("Task {} not found", task_id)))?;

        let patch = match handler.handle(&task).await {
            Ok(result) => StatusPatch {
                status: Some(TaskStatus::Completed),
                progress: Some(100),
                result: Some(result),
                ..Default::default()
            },
            Err(error) => {
                tracing::warn!("[Router] Built-in task {} failed: {}", task_id, error.message);
                StatusPatch {
                    status: Some(TaskStatus::Failed),
                    error: Some(ReportedError::Structured(error)),
                    ..Default::default()
                }
            }
        };

        self.update_task_status(task_id, patch)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("Task {} not found", task_id)))
    }

    async fn run_external(&self, task_id: &str, agent: &Agent) -> Result<Task, GatewayError> {
        let Some(endpoint) = agent.endpoint.clone() else {
            let message = "agent has no endpoint".to_string();
            self.fail_task(
                task_id,
                GatewayError::ExternalSubmissionFailed {
                    agent_id: agent.id.clone(),
                    message: message.clone(),
                }
                .to_body(),
            )
            .await?;
            return Err(GatewayError::ExternalSubmissionFailed {
                agent_id: agent.id.clone(),
                message,
            });
        };

        let callback_url = format!(
            "{}/api/tasks/{}/status",
            self.config.public_base_url.trim_end_matches('/'),
            urlencoding::encode(task_id)
        );
        let task = self
            .tasks
            .update(task_id, |t| {
                t.callback_url = Some(callback_url.clone());
                t.clone()
            })
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("Task {} not found", task_id)))?;

        let outbound = OutboundTask::from_task(&task, callback_url);
        match self.dispatcher.submit(&endpoint, &outbound).await {
            Ok(()) => {
                tracing::info!("[Router] Task {} acknowledged by {}", task_id, endpoint);
                self.tasks
                    .update(task_id, |t| {
                        // A callback may already have landed before the ack returned.
                        if !t.status.is_terminal() {
                            if t.status == TaskStatus::Assigned {
                                t.status = TaskStatus::Working;
                            }
                            t.dispatch = Dispatch::PendingExternal {
                                endpoint: endpoint.clone(),
                                acknowledged_at: Utc::now(),
                            };
                        }
                        t.clone()
                    })
                    .await?
                    .ok_or_else(|| GatewayError::NotFound(format!("Task {} not found", task_id)))
            }
            Err(message) => {
                tracing::warn!("[Router] Submission of task {} to {} failed: {}", task_id, endpoint, message);
                let err = GatewayError::ExternalSubmissionFailed {
                    agent_id: agent.id.clone(),
                    message,
                };
                self.fail_task(task_id, err.to_body()).await?;
                Err(err)
            }
        }
    }

    async fn fail_task(&self, task_id: &str, error: ErrorBody) -> Result<Task, GatewayError> {
        self.update_task_status(
            task_id,
            StatusPatch {
                status: Some(TaskStatus::Failed),
                error: Some(ReportedError::Structured(error)),
                ..Default::default()
            },
        )
        .await?
        .ok_or_else(|| GatewayError::NotFound(format!("Task {} not found", task_id)))
    }

    // ─── Status ───────────────────────────────────────────────────────────

    /// Merge a status patch into a task.
    ///
    /// Unknown ids and tasks already in a terminal state are no-ops (logged),
    /// so retried callbacks are harmless. Agent metrics are updated exactly
    /// once, on the transition into `completed` or `failed`.
    pub async fn update_task_status(
        &self,
        task_id: &str,
        patch: StatusPatch,
    ) -> Result<Option<Task>, GatewayError> {
        let outcome = self
            .tasks
            .update(task_id, |task| {
                if task.status.is_terminal() {
                    tracing::warn!(
                        "[Router] Ignoring update for task {} already {}",
                        task.id,
                        task.status.as_str()
                    );
                    return (task.clone(), None);
                }

                if let Some(assignee) = patch.assignee {
                    task.assigned_agent = Some(assignee);
                }
                if let Some(message) = patch.message {
                    task.message = Some(message);
                }
                if let Some(progress) = patch.progress {
                    task.progress = progress.min(100);
                }
                if let Some(result) = patch.result {
                    task.result = Some(result);
                }
                if let Some(error) = patch.error {
                    task.error = Some(error.into());
                }
                if let Some(next) = patch.status {
                    task.status = next;
                }

                if !task.status.is_terminal() {
                    return (task.clone(), None);
                }

                let finished_at = Utc::now();
                task.completed_at = Some(finished_at);
                if task.status == TaskStatus::Completed {
                    task.progress = 100;
                }
                let outcome = (
                    task.assigned_agent.clone(),
                    task.status,
                    task.response_time_ms(),
                    finished_at,
                );
                (task.clone(), Some(outcome))
            })
            .await?;

        let Some((task, outcome)) = outcome else {
            tracing::warn!("[Router] Status update for unknown task {}", task_id);
            return Ok(None);
        };

        if let Some((assignee, status, response_time_ms, finished_at)) = outcome {
            if let Some(agent_id) = assignee {
                tracing::info!("[Router] Task {} {} ({} by {})", task.id, status.as_str(), response_time_ms, agent_id);
                self.agents
                    .record_outcome(&agent_id, &task.id, status, response_time_ms, finished_at)
                    .await?;
            }
            self.notify_submitter(&task);
        }
        Ok(Some(task))
    }

    /// Fire-and-forget post of a terminal task to the submitter's `notify_url`.
    fn notify_submitter(&self, task: &Task) {
        let Some(url) = task.notify_url.clone() else {
            return;
        };
        let dispatcher = Arc::clone(&self.dispatcher);
        let snapshot = task.clone();
        tokio::spawn(async move {
            match dispatcher.notify(&url, &snapshot).await {
                Ok(()) => tracing::debug!("[Router] Notified {} about task {}", url, snapshot.id),
                Err(e) => tracing::warn!("[Router] Notifying {} about task {} failed: {}", url, snapshot.id, e),
            }
        });
    }

    // ─── Queries ──────────────────────────────────────────────────────────

    pub async fn get_task(&self, task_id: &str) -> Result<Option<Task>, GatewayError> {
        self.tasks.get(task_id).await
    }

    pub async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, GatewayError> {
        let tasks = match (&filter.agent_id, filter.status) {
            (Some(agent_id), _) => self.tasks.list_by_agent(agent_id).await?,
            (None, Some(status)) => return self.tasks.list_by_status(status).await,
            (None, None) => self.tasks.list().await?,
        };
        Ok(tasks
            .into_iter()
            .filter(|t| filter.status.map_or(true, |s| t.status == s))
            .collect())
    }

    pub async fn task_counts(&self) -> HashMap<String, usize> {
        self.tasks.count_by_status().await
    }
}
