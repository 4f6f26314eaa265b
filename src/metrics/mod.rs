// Read-side metrics over the coordination database.
// Nothing here writes task state; samples are appended by workers and the supervisor.

pub mod bottleneck;
pub mod reports;
pub mod types;

pub use bottleneck::BottleneckDetector;
pub use reports::MetricsReporter;
pub use types::*;

use chrono::Utc;
use std::path::Path;

use crate::queue::{
    QueueDepth, QueueError, RolePerformance, SlowTask, TaskEvent, TaskQueue, BOTTLENECK_LIMIT,
};

/// Number of slow tasks considered when building a snapshot
const SNAPSHOT_SLOW_TASKS: u32 = 20;
const SNAPSHOT_EVENTS: u32 = 50;

pub struct MetricsStore {
    queue: TaskQueue,
    detector: BottleneckDetector,
}

impl MetricsStore {
    pub fn new(queue: TaskQueue) -> Self {
        Self {
            queue,
            detector: BottleneckDetector::default(),
        }
    }

    pub fn with_thresholds(mut self, thresholds: BottleneckThresholds) -> Self {
        self.detector = BottleneckDetector::new(thresholds);
        self
    }

    pub async fn slowest_tasks(&self, limit: u32) -> Result<Vec<SlowTask>, QueueError> {
        self.queue.get_slowest_tasks(limit.min(BOTTLENECK_LIMIT)).await
    }

    pub async fn queue_depth(&self) -> Result<Vec<QueueDepth>, QueueError> {
        self.queue.get_queue_depth().await
    }

    pub async fn role_performance(&self) -> Result<Vec<RolePerformance>, QueueError> {
        self.queue.get_role_performance().await
    }

    /// Performance row plus the latest `samples` metric samples for `role`
    pub async fn role_report(&self, role: &str, samples: u32) -> Result<RoleReport, QueueError> {
        let performance = self
            .queue
            .get_role_performance()
            .await?
            .into_iter()
            .find(|perf| perf.role == role);
        let samples = self.queue.latest_samples(role, samples).await?;
        Ok(RoleReport {
            role: role.to_string(),
            performance,
            samples,
        })
    }

    pub async fn recent_events(&self, limit: u32) -> Result<Vec<TaskEvent>, QueueError> {
        self.queue.recent_events(limit).await
    }

    /// Slowest tasks and the bottlenecks derived from every aggregate
    pub async fn bottlenecks(
        &self,
        limit: u32,
    ) -> Result<(Vec<SlowTask>, Vec<PerformanceBottleneck>), QueueError> {
        let slowest = self.slowest_tasks(limit).await?;
        let depth = self.queue_depth().await?;
        let performance = self.role_performance().await?;
        let bottlenecks = self.detector.detect(&slowest, &depth, &performance);
        Ok((slowest, bottlenecks))
    }

    pub async fn snapshot(&self) -> Result<MetricsSnapshot, QueueError> {
        let slowest_tasks = self.slowest_tasks(SNAPSHOT_SLOW_TASKS).await?;
        let queue_depth = self.queue_depth().await?;
        let role_performance = self.role_performance().await?;
        let bottlenecks = self
            .detector
            .detect(&slowest_tasks, &queue_depth, &role_performance);
        let recent_events = self.recent_events(SNAPSHOT_EVENTS).await?;

        Ok(MetricsSnapshot {
            generated_at: Utc::now(),
            queue_depth,
            role_performance,
            slowest_tasks,
            bottlenecks,
            recent_events,
        })
    }

    /// Write a snapshot as pretty JSON for external dashboards
    pub async fn export_json(&self, path: &Path) -> anyhow::Result<MetricsSnapshot> {
        let snapshot = self.snapshot().await?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(path, serde_json::to_vec_pretty(&snapshot)?).await?;
        tracing::info!(path = %path.display(), "Exported metrics snapshot");
        Ok(snapshot)
    }
}
