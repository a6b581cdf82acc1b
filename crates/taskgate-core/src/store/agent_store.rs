use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::GatewayError;
use crate::models::agent::{Agent, AgentRegistration, AgentStatus, TaskHistoryEntry};
use crate::models::task::TaskStatus;

/// Outcome of an idempotent registration.
#[derive(Debug, Clone)]
pub struct Registered {
    pub agent: Agent,
    /// False when the registration matched and updated an existing agent.
    pub created: bool,
}

#[derive(Default)]
struct AgentIndex {
    agents: HashMap<String, Agent>,
    /// capability → ids of *active* agents declaring it
    by_capability: HashMap<String, HashSet<String>>,
    registration_keys: HashMap<String, String>,
    by_name_endpoint: HashMap<(String, String), String>,
}

impl AgentIndex {
    fn unindex(&mut self, agent_id: &str) {
        self.by_capability.retain(|_, ids| {
            ids.remove(agent_id);
            !ids.is_empty()
        });
    }

    fn reindex(&mut self, agent_id: &str) {
        self.unindex(agent_id);
        let Some(agent) = self.agents.get(agent_id) else {
            return;
        };
        if !agent.is_active() {
            return;
        }
        for cap in &agent.capabilities {
            self.by_capability
                .entry(cap.clone())
                .or_default()
                .insert(agent_id.to_string());
        }
    }

    fn upsert(&mut self, agent: Agent) {
        let id = agent.id.clone();
        if let Some(endpoint) = &agent.endpoint {
            self.by_name_endpoint
                .insert((agent.name.clone(), endpoint.clone()), id.clone());
        }
        self.agents.insert(id.clone(), agent);
        self.reindex(&id);
    }
}

/// In-memory agent registry with its capability index.
///
/// Every mutation re-derives the index entries for the touched agent inside
/// the same write lock, so readers never see the two out of step.
#[derive(Clone, Default)]
pub struct AgentStore {
    inner: Arc<RwLock<AgentIndex>>,
}

impl AgentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn save(&self, agent: &Agent) -> Result<(), GatewayError> {
        self.inner.write().await.upsert(agent.clone());
        Ok(())
    }

    pub async fn get(&self, agent_id: &str) -> Result<Option<Agent>, GatewayError> {
        Ok(self.inner.read().await.agents.get(agent_id).cloned())
    }

    pub async fn list(&self) -> Result<Vec<Agent>, GatewayError> {
        let inner = self.inner.read().await;
        let mut agents: Vec<Agent> = inner.agents.values().cloned().collect();
        agents.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(agents)
    }

    /// Register an external agent, or update the one matching the idempotency
    /// key or the `(name, endpoint)` pair.
    pub async fn register(&self, reg: &AgentRegistration) -> Result<Registered, GatewayError> {
        if reg.name.trim().is_empty() {
            return Err(GatewayError::Validation("Agent name is required".into()));
        }
        if reg.endpoint.trim().is_empty() {
            return Err(GatewayError::Validation("Agent endpoint is required".into()));
        }
        let capabilities: BTreeSet<String> = reg
            .capabilities
            .iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();
        if capabilities.is_empty() {
            return Err(GatewayError::Validation(
                "Agent must declare at least one capability".into(),
            ));
        }

        let mut inner = self.inner.write().await;

        let by_key = reg
            .idempotency_key
            .as_ref()
            .and_then(|k| inner.registration_keys.get(k))
            .cloned();
        let by_pair = inner
            .by_name_endpoint
            .get(&(reg.name.clone(), reg.endpoint.clone()))
            .cloned();
        // One (name, endpoint) pair never identifies two agents.
        if let (Some(keyed), Some(owner)) = (&by_key, &by_pair) {
            if keyed != owner {
                return Err(GatewayError::Conflict(format!(
                    "Agent '{}' at {} is already registered as {}",
                    reg.name, reg.endpoint, owner
                )));
            }
        }
        let existing_id = by_key.or(by_pair);

        let specialization = reg
            .specialization
            .clone()
            .unwrap_or_else(|| "general".to_string());

        let registered = match existing_id.and_then(|id| inner.agents.get(&id).cloned()) {
            Some(mut agent) => {
                if let Some(old_endpoint) = &agent.endpoint {
                    inner
                        .by_name_endpoint
                        .remove(&(agent.name.clone(), old_endpoint.clone()));
                }
                agent.name = reg.name.clone();
                agent.endpoint = Some(reg.endpoint.clone());
                agent.specialization = specialization;
                agent.capabilities = capabilities;
                agent.updated_at = Utc::now();
                tracing::info!("[AgentStore] Updated agent {} ({})", agent.id, agent.name);
                Registered {
                    agent,
                    created: false,
                }
            }
            None => {
                let agent = Agent::new(
                    uuid::Uuid::new_v4().to_string(),
                    reg.name.clone(),
                    specialization,
                    capabilities,
                    Some(reg.endpoint.clone()),
                    false,
                );
                tracing::info!("[AgentStore] Registered agent {} ({})", agent.id, agent.name);
                Registered {
                    agent,
                    created: true,
                }
            }
        };

        if let Some(key) = &reg.idempotency_key {
            inner
                .registration_keys
                .insert(key.clone(), registered.agent.id.clone());
        }
        inner.upsert(registered.agent.clone());
        Ok(registered)
    }

    pub async fn set_status(
        &self,
        agent_id: &str,
        status: AgentStatus,
    ) -> Result<Agent, GatewayError> {
        let mut inner = self.inner.write().await;
        let agent = inner
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| GatewayError::NotFound(format!("Agent {} not found", agent_id)))?;
        agent.status = status;
        agent.updated_at = Utc::now();
        let agent = agent.clone();
        inner.reindex(agent_id);
        Ok(agent)
    }

    pub async fn update_capabilities(
        &self,
        agent_id: &str,
        capabilities: BTreeSet<String>,
    ) -> Result<Agent, GatewayError> {
        let mut inner = self.inner.write().await;
        let agent = inner
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| GatewayError::NotFound(format!("Agent {} not found", agent_id)))?;
        agent.capabilities = capabilities;
        agent.updated_at = Utc::now();
        let agent = agent.clone();
        inner.reindex(agent_id);
        Ok(agent)
    }

    /// Active agents declaring every capability in `required`.
    ///
    /// The first capability seeds the set and each later one narrows it.
    /// An empty requirement matches every active agent.
    pub async fn candidates(&self, required: &[String]) -> Result<Vec<Agent>, GatewayError> {
        let inner = self.inner.read().await;

        let ids: HashSet<String> = match required.split_first() {
            None => inner
                .agents
                .values()
                .filter(|a| a.is_active())
                .map(|a| a.id.clone())
                .collect(),
            Some((first, rest)) => {
                let mut set = inner.by_capability.get(first).cloned().unwrap_or_default();
                for cap in rest {
                    if set.is_empty() {
                        break;
                    }
                    match inner.by_capability.get(cap) {
                        Some(ids) => set.retain(|id| ids.contains(id)),
                        None => set.clear(),
                    }
                }
                set
            }
        };

        Ok(ids
            .iter()
            .filter_map(|id| inner.agents.get(id))
            .filter(|a| a.is_active() && a.has_capabilities(required))
            .cloned()
            .collect())
    }

    /// Every capability name currently in the index.
    pub async fn known_capabilities(&self) -> Vec<String> {
        let mut caps: Vec<String> = self.inner.read().await.by_capability.keys().cloned().collect();
        caps.sort();
        caps
    }

    /// Fold a finished task into the agent's metrics and history.
    pub async fn record_outcome(
        &self,
        agent_id: &str,
        task_id: &str,
        status: TaskStatus,
        response_time_ms: f64,
        finished_at: DateTime<Utc>,
    ) -> Result<(), GatewayError> {
        let mut inner = self.inner.write().await;
        let Some(agent) = inner.agents.get_mut(agent_id) else {
            tracing::warn!(
                "[AgentStore] Outcome for task {} references unknown agent {}",
                task_id,
                agent_id
            );
            return Ok(());
        };
        agent.performance_metrics.record(
            status == TaskStatus::Completed,
            response_time_ms,
            finished_at,
        );
        agent.task_history.push(TaskHistoryEntry {
            task_id: task_id.to_string(),
            status,
            response_time_ms,
            finished_at,
        });
        agent.updated_at = Utc::now();
        Ok(())
    }
}
