//! KV-backed task table
//!
//! Single-table layout over the durable KV:
//! - `task:{task_id}` holds the serialized record
//! - `task_index:{agent_id}:{status}:{task_id}` is an empty marker used for
//!   recovery scans by `(agent_id, status)`
//!
//! Index keys move together with status transitions.

use crate::model::{AgentTask, TaskStatus};
use chrono::{DateTime, Utc};
use paperscout_common::errors::Result;
use paperscout_common::kv::KvStore;
use std::sync::Arc;
use uuid::Uuid;

fn task_key(task_id: Uuid) -> String {
    format!("task:{}", task_id)
}

fn index_key(agent_id: &str, status: TaskStatus, task_id: Uuid) -> String {
    format!("task_index:{}:{}:{}", agent_id, status.as_str(), task_id)
}

/// Durable task storage over the KV collaborator
#[derive(Clone)]
pub struct TaskStore {
    kv: Arc<dyn KvStore>,
}

impl TaskStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    pub async fn insert(&self, task: &AgentTask) -> Result<()> {
        self.kv
            .put_json(&task_key(task.task_id), task, None)
            .await?;
        self.kv
            .put(
                &index_key(&task.agent_id, task.status, task.task_id),
                Vec::new(),
                None,
            )
            .await
    }

    pub async fn load(&self, task_id: Uuid) -> Result<Option<AgentTask>> {
        self.kv.get_json(&task_key(task_id)).await
    }

    /// Persist an updated record, moving its index entry when the status
    /// changed.
    pub async fn save(&self, task: &AgentTask, previous_status: TaskStatus) -> Result<()> {
        self.kv
            .put_json(&task_key(task.task_id), task, None)
            .await?;
        if previous_status != task.status {
            self.kv
                .delete(&index_key(&task.agent_id, previous_status, task.task_id))
                .await?;
            self.kv
                .put(
                    &index_key(&task.agent_id, task.status, task.task_id),
                    Vec::new(),
                    None,
                )
                .await?;
        }
        Ok(())
    }

    /// Recovery scan: all tasks for one agent in one status
    pub async fn scan_by_status(
        &self,
        agent_id: &str,
        status: TaskStatus,
    ) -> Result<Vec<AgentTask>> {
        let prefix = format!("task_index:{}:{}:", agent_id, status.as_str());
        let mut tasks = Vec::new();
        for (key, _) in self.kv.scan_prefix(&prefix).await? {
            let Some(task_id) = key
                .rsplit(':')
                .next()
                .and_then(|id| Uuid::parse_str(id).ok())
            else {
                continue;
            };
            if let Some(task) = self.load(task_id).await? {
                tasks.push(task);
            }
        }
        Ok(tasks)
    }

    /// Terminal tasks finished before `cutoff`
    pub async fn scan_terminal_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<AgentTask>> {
        let mut old = Vec::new();
        for (_, bytes) in self.kv.scan_prefix("task:").await? {
            let Ok(task) = serde_json::from_slice::<AgentTask>(&bytes) else {
                continue;
            };
            if task.status.is_terminal() && task.finished_at.is_some_and(|at| at < cutoff) {
                old.push(task);
            }
        }
        Ok(old)
    }

    pub async fn remove(&self, task: &AgentTask) -> Result<()> {
        self.kv.delete(&task_key(task.task_id)).await?;
        self.kv
            .delete(&index_key(&task.agent_id, task.status, task.task_id))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paperscout_common::kv::MemoryKv;

    fn store() -> TaskStore {
        TaskStore::new(Arc::new(MemoryKv::new()))
    }

    #[tokio::test]
    async fn test_insert_and_load() {
        let store = store();
        let task = AgentTask::new("agent-a", Uuid::new_v4(), serde_json::json!({"k": 1}));
        store.insert(&task).await.unwrap();

        let loaded = store.load(task.task_id).await.unwrap().unwrap();
        assert_eq!(loaded.task_id, task.task_id);
        assert_eq!(loaded.status, TaskStatus::Pending);
        assert_eq!(loaded.input, serde_json::json!({"k": 1}));
    }

    #[tokio::test]
    async fn test_index_moves_with_status() {
        let store = store();
        let mut task = AgentTask::new("agent-a", Uuid::new_v4(), serde_json::json!({}));
        store.insert(&task).await.unwrap();

        assert_eq!(
            store
                .scan_by_status("agent-a", TaskStatus::Pending)
                .await
                .unwrap()
                .len(),
            1
        );

        task.status = TaskStatus::Processing;
        store.save(&task, TaskStatus::Pending).await.unwrap();

        assert!(store
            .scan_by_status("agent-a", TaskStatus::Pending)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            store
                .scan_by_status("agent-a", TaskStatus::Processing)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_scan_terminal_older_than() {
        let store = store();
        let mut old_task = AgentTask::new("agent-a", Uuid::new_v4(), serde_json::json!({}));
        old_task.status = TaskStatus::Completed;
        old_task.finished_at = Some(Utc::now() - chrono::Duration::days(10));
        store.insert(&old_task).await.unwrap();

        let mut fresh_task = AgentTask::new("agent-a", Uuid::new_v4(), serde_json::json!({}));
        fresh_task.status = TaskStatus::Completed;
        fresh_task.finished_at = Some(Utc::now());
        store.insert(&fresh_task).await.unwrap();

        let cutoff = Utc::now() - chrono::Duration::days(7);
        let old = store.scan_terminal_older_than(cutoff).await.unwrap();
        assert_eq!(old.len(), 1);
        assert_eq!(old[0].task_id, old_task.task_id);

        store.remove(&old[0]).await.unwrap();
        assert!(store.load(old_task.task_id).await.unwrap().is_none());
    }
}
