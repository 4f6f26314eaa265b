//! Read-only aggregate queries over task history.

use sqlx::Row;

use super::task_queue::{from_millis, TaskQueue};
use super::types::*;
use crate::priority::{Priority, PriorityBucket};

/// Size of the `bottlenecks` view
pub const BOTTLENECK_LIMIT: u32 = 100;

impl TaskQueue {
    /// Completed tasks ordered by duration, slowest first
    pub async fn get_slowest_tasks(&self, limit: u32) -> Result<Vec<SlowTask>, QueueError> {
        let rows = sqlx::query(
            "SELECT id, recipient, type, priority, duration_ms, completed_at FROM tasks \
             WHERE status = 'completed' AND duration_ms IS NOT NULL \
             ORDER BY duration_ms DESC LIMIT ?1",
        )
        .bind(limit.min(BOTTLENECK_LIMIT) as i64)
        .fetch_all(self.pool())
        .await?;

        rows.iter()
            .map(|row| -> Result<SlowTask, QueueError> {
                let raw_priority: i64 = row.try_get("priority")?;
                Ok(SlowTask {
                    id: row.try_get("id")?,
                    recipient: row.try_get("recipient")?,
                    task_type: row.try_get("type")?,
                    priority: Priority::new(raw_priority).unwrap_or_default(),
                    duration_ms: row.try_get("duration_ms")?,
                    completed_at: row.try_get::<Option<i64>, _>("completed_at")?.map(from_millis),
                })
            })
            .collect()
    }

    /// Per-recipient totals and duration statistics for completed work
    pub async fn get_role_performance(&self) -> Result<Vec<RolePerformance>, QueueError> {
        let rows = sqlx::query(
            "SELECT recipient AS role, \
                    COUNT(*) AS total, \
                    SUM(CASE WHEN status = 'queued' THEN 1 ELSE 0 END) AS queued, \
                    SUM(CASE WHEN status = 'running' THEN 1 ELSE 0 END) AS running, \
                    SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END) AS completed, \
                    SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END) AS failed, \
                    AVG(CASE WHEN status = 'completed' THEN duration_ms END) AS avg_duration_ms, \
                    MIN(CASE WHEN status = 'completed' THEN duration_ms END) AS min_duration_ms, \
                    MAX(CASE WHEN status = 'completed' THEN duration_ms END) AS max_duration_ms \
             FROM tasks GROUP BY recipient ORDER BY recipient",
        )
        .fetch_all(self.pool())
        .await?;

        rows.iter()
            .map(|row| -> Result<RolePerformance, QueueError> {
                Ok(RolePerformance {
                    role: row.try_get("role")?,
                    total: row.try_get::<i64, _>("total")? as u64,
                    queued: row.try_get::<i64, _>("queued")? as u64,
                    running: row.try_get::<i64, _>("running")? as u64,
                    completed: row.try_get::<i64, _>("completed")? as u64,
                    failed: row.try_get::<i64, _>("failed")? as u64,
                    avg_duration_ms: row.try_get("avg_duration_ms")?,
                    min_duration_ms: row.try_get("min_duration_ms")?,
                    max_duration_ms: row.try_get("max_duration_ms")?,
                })
            })
            .collect()
    }

    /// Queued task counts per recipient and priority bucket
    pub async fn get_queue_depth(&self) -> Result<Vec<QueueDepth>, QueueError> {
        let rows = sqlx::query(
            "SELECT recipient, \
                    CASE WHEN priority <= 3 THEN 'high' \
                         WHEN priority <= 7 THEN 'normal' \
                         ELSE 'low' END AS bucket, \
                    COUNT(*) AS count \
             FROM tasks WHERE status = 'queued' \
             GROUP BY recipient, bucket \
             ORDER BY recipient, MIN(priority)",
        )
        .fetch_all(self.pool())
        .await?;

        rows.iter()
            .map(|row| -> Result<QueueDepth, QueueError> {
                let bucket: String = row.try_get("bucket")?;
                Ok(QueueDepth {
                    recipient: row.try_get("recipient")?,
                    bucket: PriorityBucket::parse(&bucket).ok_or_else(|| QueueError::CorruptRow {
                        reason: format!("unknown priority bucket '{bucket}'"),
                    })?,
                    count: row.try_get::<i64, _>("count")? as u64,
                })
            })
            .collect()
    }

    /// Most recent samples for a role, newest first
    pub async fn latest_samples(&self, role: &str, limit: u32) -> Result<Vec<MetricSample>, QueueError> {
        let rows = sqlx::query(
            "SELECT role, metric_name, metric_value, timestamp FROM agent_metrics \
             WHERE role = ?1 ORDER BY timestamp DESC, id DESC LIMIT ?2",
        )
        .bind(role)
        .bind(limit as i64)
        .fetch_all(self.pool())
        .await?;

        rows.iter()
            .map(|row| -> Result<MetricSample, QueueError> {
                Ok(MetricSample {
                    role: row.try_get("role")?,
                    metric_name: row.try_get("metric_name")?,
                    value: row.try_get("metric_value")?,
                    timestamp: from_millis(row.try_get("timestamp")?),
                })
            })
            .collect()
    }

    /// The last `limit` task transitions in chronological order
    pub async fn recent_events(&self, limit: u32) -> Result<Vec<TaskEvent>, QueueError> {
        let rows = sqlx::query(
            "SELECT id, task_id, role, from_status, to_status, at, detail FROM task_events \
             ORDER BY id DESC LIMIT ?1",
        )
        .bind(limit as i64)
        .fetch_all(self.pool())
        .await?;

        let mut events = rows
            .iter()
            .map(|row| -> Result<TaskEvent, QueueError> {
                let from: Option<String> = row.try_get("from_status")?;
                let to: String = row.try_get("to_status")?;
                Ok(TaskEvent {
                    id: row.try_get("id")?,
                    task_id: row.try_get("task_id")?,
                    role: row.try_get("role")?,
                    from_status: from.map(|s| s.parse()).transpose()?,
                    to_status: to.parse()?,
                    at: from_millis(row.try_get("at")?),
                    detail: row.try_get("detail")?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        events.reverse();
        Ok(events)
    }

    /// Most recent delegation traces, newest first
    pub async fn recent_delegations(&self, limit: u32) -> Result<Vec<DelegationTrace>, QueueError> {
        let rows = sqlx::query(
            "SELECT role, path, owner, task_id, at FROM delegations ORDER BY id DESC LIMIT ?1",
        )
        .bind(limit as i64)
        .fetch_all(self.pool())
        .await?;

        rows.iter()
            .map(|row| -> Result<DelegationTrace, QueueError> {
                Ok(DelegationTrace {
                    role: row.try_get("role")?,
                    path: row.try_get("path")?,
                    owner: row.try_get("owner")?,
                    task_id: row.try_get("task_id")?,
                    at: from_millis(row.try_get("at")?),
                })
            })
            .collect()
    }
}
