//! Durable agent task records

use chrono::{DateTime, Utc};
use paperscout_common::errors::ErrorCode;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Task lifecycle status.
///
/// Exactly one PENDING -> PROCESSING transition, then exactly one
/// transition to a terminal state. Terminal states are immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    TimedOut,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed
                | TaskStatus::Failed
                | TaskStatus::TimedOut
                | TaskStatus::Cancelled
        )
    }

    /// Stable name used in index keys and metrics labels
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::TimedOut => "timed_out",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

/// Terminal error attached to a failed task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    pub kind: ErrorCode,
    pub message: String,
}

/// One durable unit of asynchronous work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTask {
    pub task_id: Uuid,
    pub agent_id: String,
    pub user_id: Uuid,
    pub input: serde_json::Value,
    pub status: TaskStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<TaskError>,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl AgentTask {
    pub fn new(agent_id: &str, user_id: Uuid, input: serde_json::Value) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            agent_id: agent_id.to_string(),
            user_id,
            input,
            status: TaskStatus::Pending,
            result: None,
            error: None,
            attempts: 0,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Milliseconds spent waiting before the run started
    pub fn queued_ms(&self) -> Option<u64> {
        self.started_at.map(|started| {
            started
                .signed_duration_since(self.created_at)
                .num_milliseconds()
                .max(0) as u64
        })
    }

    /// Milliseconds spent running
    pub fn run_ms(&self) -> Option<u64> {
        match (self.started_at, self.finished_at) {
            (Some(started), Some(finished)) => Some(
                finished
                    .signed_duration_since(started)
                    .num_milliseconds()
                    .max(0) as u64,
            ),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Processing.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::TimedOut.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_new_task_is_pending() {
        let task = AgentTask::new("agent", Uuid::new_v4(), serde_json::json!({}));
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.attempts, 0);
        assert!(task.started_at.is_none());
        assert!(task.queued_ms().is_none());
    }

    #[test]
    fn test_timers() {
        let mut task = AgentTask::new("agent", Uuid::new_v4(), serde_json::json!({}));
        task.started_at = Some(task.created_at + chrono::Duration::milliseconds(40));
        task.finished_at = Some(task.created_at + chrono::Duration::milliseconds(100));
        assert_eq!(task.queued_ms(), Some(40));
        assert_eq!(task.run_ms(), Some(60));
    }
}
