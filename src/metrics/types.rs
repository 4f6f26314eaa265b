use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::queue::{MetricSample, QueueDepth, RolePerformance, SlowTask, TaskEvent};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceBottleneck {
    pub detected_at: DateTime<Utc>,
    pub bottleneck_type: BottleneckType,
    pub severity: BottleneckSeverity,
    pub role: String,
    pub description: String,
    pub suggested_action: String,
    pub metrics: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BottleneckType {
    /// Individual tasks taking far longer than expected
    SlowTask,
    /// Work piling up in a role's queue
    QueueBacklog,
    /// A role failing a large share of its tasks
    FailureRate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BottleneckSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// Cut-offs used to classify bottlenecks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BottleneckThresholds {
    /// Tasks slower than this are reported at all
    pub slow_task_ms: i64,
    pub high_task_ms: i64,
    pub critical_task_ms: i64,
    /// Queued tasks per role before a backlog is reported
    pub backlog: u64,
    /// Failure share (0-1) before a role is reported, once `min_finished` tasks have finished
    pub failure_rate: f64,
    pub min_finished: u64,
}

impl Default for BottleneckThresholds {
    fn default() -> Self {
        Self {
            slow_task_ms: 2_000,
            high_task_ms: 5_000,
            critical_task_ms: 10_000,
            backlog: 10,
            failure_rate: 0.25,
            min_finished: 4,
        }
    }
}

/// Performance view of a single role
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleReport {
    pub role: String,
    pub performance: Option<RolePerformance>,
    pub samples: Vec<MetricSample>,
}

/// Everything the read side knows, in one document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub generated_at: DateTime<Utc>,
    pub queue_depth: Vec<QueueDepth>,
    pub role_performance: Vec<RolePerformance>,
    pub slowest_tasks: Vec<SlowTask>,
    pub bottlenecks: Vec<PerformanceBottleneck>,
    pub recent_events: Vec<TaskEvent>,
}
