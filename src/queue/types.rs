use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::priority::{Priority, PriorityBucket};

/// Errors produced by the task queue
#[derive(Debug, Error)]
pub enum QueueError {
    /// Task is absent or not in the state the transition requires
    #[error("Task {id} not found (or not in a state that allows this transition)")]
    TaskNotFound { id: String },

    #[error("Invalid priority {value}: must be between 1 and 10")]
    InvalidPriority { value: i64 },

    #[error("Task recipient must not be empty")]
    EmptyRecipient,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt row: {reason}")]
    CorruptRow { reason: String },
}

impl QueueError {
    /// Whether the same call may succeed later (busy or locked database, I/O)
    pub fn is_transient(&self) -> bool {
        matches!(self, QueueError::Database(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(TaskStatus::Queued),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(QueueError::CorruptRow {
                reason: format!("unknown task status '{other}'"),
            }),
        }
    }
}

/// A unit of work routed to exactly one recipient role
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub sender: String,
    pub recipient: String,
    #[serde(rename = "type")]
    pub task_type: String,
    pub priority: Priority,
    pub status: TaskStatus,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub error: Option<String>,
    pub claimed_by: Option<String>,
}

/// Producer-side description of a task before it is queued
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub sender: String,
    pub recipient: String,
    pub task_type: String,
    /// Raw priority; validated by `TaskQueue::send`
    pub priority: i64,
    pub payload: serde_json::Value,
}

impl NewTask {
    pub fn new(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        task_type: impl Into<String>,
    ) -> Self {
        Self {
            sender: sender.into(),
            recipient: recipient.into(),
            task_type: task_type.into(),
            priority: Priority::DEFAULT.value() as i64,
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// One row of the `bottlenecks` view
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlowTask {
    pub id: String,
    pub recipient: String,
    pub task_type: String,
    pub priority: Priority,
    pub duration_ms: i64,
    pub completed_at: Option<DateTime<Utc>>,
}

/// One row of the `role_performance` view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolePerformance {
    pub role: String,
    pub total: u64,
    pub queued: u64,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
    pub avg_duration_ms: Option<f64>,
    pub min_duration_ms: Option<i64>,
    pub max_duration_ms: Option<i64>,
}

impl RolePerformance {
    /// completed / (completed + failed), None when nothing has finished yet
    pub fn success_rate(&self) -> Option<f64> {
        let finished = self.completed + self.failed;
        (finished > 0).then(|| self.completed as f64 / finished as f64)
    }
}

/// One row of the `queue_depth` view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDepth {
    pub recipient: String,
    pub bucket: PriorityBucket,
    pub count: u64,
}

/// Append-only metric sample
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSample {
    pub role: String,
    pub metric_name: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

/// Task state transition record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEvent {
    pub id: i64,
    pub task_id: String,
    pub role: String,
    pub from_status: Option<TaskStatus>,
    pub to_status: TaskStatus,
    pub at: DateTime<Utc>,
    pub detail: Option<String>,
}

/// Audit record of a write attempt rerouted to the owning role
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegationTrace {
    pub role: String,
    pub path: String,
    pub owner: String,
    pub task_id: Option<String>,
    pub at: DateTime<Utc>,
}

/// Row counts removed by a retention pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupStats {
    pub tasks: u64,
    pub metrics: u64,
    pub events: u64,
    pub delegations: u64,
}

impl CleanupStats {
    /// Task + metric rows, the figure reported to callers
    pub fn deleted(&self) -> u64 {
        self.tasks + self.metrics
    }
}
