use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::GatewayError;
use crate::models::task::{Task, TaskStatus};

/// Result of inserting a task that may carry an idempotency key.
#[derive(Debug, Clone)]
pub enum Insert {
    Created(Task),
    /// The key was already bound; the existing record is returned untouched.
    Replayed(Task),
}

#[derive(Default)]
struct TaskIndex {
    tasks: HashMap<String, Task>,
    idempotency: HashMap<String, String>,
}

/// In-memory task records plus the idempotency-key map.
#[derive(Clone, Default)]
pub struct TaskStore {
    inner: Arc<RwLock<TaskIndex>>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Existing task bound to `key`, if any.
    pub async fn find_by_key(&self, key: &str) -> Result<Option<Task>, GatewayError> {
        let inner = self.inner.read().await;
        Ok(inner
            .idempotency
            .get(key)
            .and_then(|id| inner.tasks.get(id))
            .cloned())
    }

    /// Insert a new task, or return the one already bound to its idempotency key.
    ///
    /// Key lookup and insertion happen under one write lock, so two racing
    /// submissions with the same key produce exactly one record.
    pub async fn insert(&self, task: Task) -> Result<Insert, GatewayError> {
        let mut inner = self.inner.write().await;

        if let Some(key) = &task.idempotency_key {
            if let Some(existing) = inner.idempotency.get(key).and_then(|id| inner.tasks.get(id)) {
                return Ok(Insert::Replayed(existing.clone()));
            }
        }
        if inner.tasks.contains_key(&task.id) {
            return Err(GatewayError::Conflict(format!("Task {} already exists", task.id)));
        }

        if let Some(key) = &task.idempotency_key {
            inner.idempotency.insert(key.clone(), task.id.clone());
        }
        inner.tasks.insert(task.id.clone(), task.clone());
        Ok(Insert::Created(task))
    }

    pub async fn get(&self, task_id: &str) -> Result<Option<Task>, GatewayError> {
        Ok(self.inner.read().await.tasks.get(task_id).cloned())
    }

    /// Apply `f` to the stored task under the write lock.
    ///
    /// Returns `None` when the id is unknown.
    pub async fn update<R>(
        &self,
        task_id: &str,
        f: impl FnOnce(&mut Task) -> R,
    ) -> Result<Option<R>, GatewayError> {
        let mut inner = self.inner.write().await;
        Ok(inner.tasks.get_mut(task_id).map(f))
    }

    pub async fn list(&self) -> Result<Vec<Task>, GatewayError> {
        let inner = self.inner.read().await;
        let mut tasks: Vec<Task> = inner.tasks.values().cloned().collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tasks)
    }

    pub async fn list_by_agent(&self, agent_id: &str) -> Result<Vec<Task>, GatewayError> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|t| t.assigned_agent.as_deref() == Some(agent_id))
            .collect())
    }

    pub async fn list_by_status(&self, status: TaskStatus) -> Result<Vec<Task>, GatewayError> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|t| t.status == status)
            .collect())
    }

    /// Task counts keyed by status string.
    pub async fn count_by_status(&self) -> HashMap<String, usize> {
        let inner = self.inner.read().await;
        let mut counts = HashMap::new();
        for task in inner.tasks.values() {
            *counts.entry(task.status.as_str().to_string()).or_insert(0) += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::task::TaskRequest;

    fn task(id: &str, key: Option<&str>) -> Task {
        Task::new(
            id.to_string(),
            &TaskRequest {
                initiator_id: "user".into(),
                description: "send a reminder".into(),
                idempotency_key: key.map(String::from),
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_insert_replays_on_same_key() {
        let store = TaskStore::new();
        let first = match store.insert(task("t1", Some("k1"))).await.unwrap() {
            Insert::Created(t) => t,
            other => panic!("expected Created, got {:?}", other),
        };
        match store.insert(task("t2", Some("k1"))).await.unwrap() {
            Insert::Replayed(t) => assert_eq!(t.id, first.id),
            other => panic!("expected Replayed, got {:?}", other),
        }
        assert!(store.get("t2").await.unwrap().is_none());
        assert_eq!(store.find_by_key("k1").await.unwrap().unwrap().id, "t1");
    }

    #[tokio::test]
    async fn test_duplicate_id_conflicts() {
        let store = TaskStore::new();
        store.insert(task("t1", None)).await.unwrap();
        let err = store.insert(task("t1", None)).await.unwrap_err();
        assert_eq!(err.code(), "CONFLICT");
    }

    #[tokio::test]
    async fn test_update_and_filters() {
        let store = TaskStore::new();
        store.insert(task("t1", None)).await.unwrap();
        store.insert(task("t2", None)).await.unwrap();

        let updated = store
            .update("t1", |t| {
                t.assigned_agent = Some("agent-1".into());
                t.status = TaskStatus::Working;
            })
            .await
            .unwrap();
        assert!(updated.is_some());
        assert!(store.update("missing", |_| ()).await.unwrap().is_none());

        assert_eq!(store.list_by_agent("agent-1").await.unwrap().len(), 1);
        assert_eq!(store.list_by_status(TaskStatus::Submitted).await.unwrap().len(), 1);
        assert_eq!(store.count_by_status().await.get("working"), Some(&1));
    }
}
