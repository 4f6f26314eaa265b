use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::types::*;
use crate::database::DatabaseManager;
use crate::priority::Priority;

pub(crate) const TASK_COLUMNS: &str = "id, sender, recipient, type, priority, status, payload, \
     created_at, started_at, completed_at, duration_ms, error_message, claimed_by";

/// Pickup order for a recipient: priority, then age, then insertion order
const NEXT_QUEUED: &str = "SELECT id FROM tasks WHERE recipient = ?1 AND status = 'queued' \
     ORDER BY priority ASC, created_at ASC, rowid ASC LIMIT 1";

const MS_PER_DAY: i64 = 86_400_000;

/// Durable, priority-ordered task queue shared by every worker process.
///
/// Each mutating operation is a conditional update on one row, so a transition
/// only succeeds from the state it expects. Claims go through a single
/// `UPDATE … RETURNING` statement.
#[derive(Clone)]
pub struct TaskQueue {
    pool: SqlitePool,
}

impl TaskQueue {
    pub fn new(database: &DatabaseManager) -> Self {
        Self {
            pool: database.pool().clone(),
        }
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert a new task in `queued` state and return it
    pub async fn send(&self, task: NewTask) -> Result<Task, QueueError> {
        let mut tx = self.pool.begin().await?;
        let queued = insert_task(&mut tx, task).await?;
        tx.commit().await?;

        info!(
            task_id = %queued.id,
            sender = %queued.sender,
            recipient = %queued.recipient,
            task_type = %queued.task_type,
            priority = %queued.priority,
            "Task queued"
        );
        Ok(queued)
    }

    /// Queue a delegated write for the owning role and record the audit trace atomically
    pub async fn send_delegated(
        &self,
        task: NewTask,
        trace: &DelegationTrace,
    ) -> Result<Task, QueueError> {
        let mut tx = self.pool.begin().await?;
        let queued = insert_task(&mut tx, task).await?;
        sqlx::query("INSERT INTO delegations (role, path, owner, task_id, at) VALUES (?1, ?2, ?3, ?4, ?5)")
            .bind(&trace.role)
            .bind(&trace.path)
            .bind(&trace.owner)
            .bind(&queued.id)
            .bind(millis(trace.at))
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(
            role = %trace.role,
            path = %trace.path,
            owner = %trace.owner,
            task_id = %queued.id,
            "Write delegated to owning role"
        );
        Ok(queued)
    }

    /// Highest-priority, oldest queued task for `recipient`. Does not claim it.
    pub async fn get(&self, recipient: &str) -> Result<Option<Task>, QueueError> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE recipient = ?1 AND status = 'queued' \
             ORDER BY priority ASC, created_at ASC, rowid ASC LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(recipient)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(task_from_row).transpose()
    }

    /// Fetch a task by id regardless of state
    pub async fn task(&self, id: &str) -> Result<Option<Task>, QueueError> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(task_from_row).transpose()
    }

    /// Select and claim the next task for `recipient` in one statement.
    ///
    /// Concurrent callers (any process) never receive the same task.
    pub async fn claim_next(&self, recipient: &str, role: &str) -> Result<Option<Task>, QueueError> {
        let now = millis(Utc::now());
        let sql = format!(
            "UPDATE tasks SET status = 'running', started_at = MAX(?2, created_at), claimed_by = ?3 \
             WHERE id = ({NEXT_QUEUED}) AND status = 'queued' \
             RETURNING {TASK_COLUMNS}"
        );

        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(&sql)
            .bind(recipient)
            .bind(now)
            .bind(role)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(None);
        };
        let task = task_from_row(&row)?;
        insert_event(&mut tx, &task.id, role, Some(TaskStatus::Queued), TaskStatus::Running, now, None)
            .await?;
        tx.commit().await?;

        debug!(task_id = %task.id, role = %role, priority = %task.priority, "Task claimed");
        Ok(Some(task))
    }

    /// Transition `queued → running`
    pub async fn mark_started(&self, id: &str, role: &str) -> Result<(), QueueError> {
        let now = millis(Utc::now());
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "UPDATE tasks SET status = 'running', started_at = MAX(?2, created_at), claimed_by = ?3 \
             WHERE id = ?1 AND status = 'queued'",
        )
        .bind(id)
        .bind(now)
        .bind(role)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(QueueError::TaskNotFound { id: id.to_string() });
        }
        insert_event(&mut tx, id, role, Some(TaskStatus::Queued), TaskStatus::Running, now, None).await?;
        tx.commit().await?;

        debug!(task_id = %id, role = %role, "Task started");
        Ok(())
    }

    /// Transition `running → completed`
    pub async fn mark_completed(&self, id: &str, duration_ms: i64) -> Result<(), QueueError> {
        self.complete(id, None, duration_ms).await
    }

    /// Transition `running → completed`, only if `role` is the one that claimed the task
    pub async fn mark_completed_as(&self, id: &str, role: &str, duration_ms: i64) -> Result<(), QueueError> {
        self.complete(id, Some(role), duration_ms).await
    }

    /// Transition `running → failed`, keeping the error text on the row
    pub async fn mark_failed(&self, id: &str, error_message: &str) -> Result<(), QueueError> {
        self.fail(id, None, error_message).await
    }

    /// Transition `running → failed`, only if `role` is the one that claimed the task
    pub async fn mark_failed_as(&self, id: &str, role: &str, error_message: &str) -> Result<(), QueueError> {
        self.fail(id, Some(role), error_message).await
    }

    async fn complete(&self, id: &str, claimant: Option<&str>, duration_ms: i64) -> Result<(), QueueError> {
        let now = millis(Utc::now());
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            "UPDATE tasks SET status = 'completed', \
                 completed_at = MAX(?2, COALESCE(started_at, created_at)), \
                 duration_ms = ?3, error_message = NULL \
             WHERE id = ?1 AND status = 'running' AND (?4 IS NULL OR claimed_by = ?4) \
             RETURNING COALESCE(claimed_by, recipient) AS role",
        )
        .bind(id)
        .bind(now)
        .bind(duration_ms.max(0))
        .bind(claimant)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Err(QueueError::TaskNotFound { id: id.to_string() });
        };
        let role: String = row.try_get("role")?;
        insert_event(&mut tx, id, &role, Some(TaskStatus::Running), TaskStatus::Completed, now, None)
            .await?;
        tx.commit().await?;

        info!(task_id = %id, role = %role, duration_ms, "Task completed");
        Ok(())
    }

    async fn fail(&self, id: &str, claimant: Option<&str>, error_message: &str) -> Result<(), QueueError> {
        let now = millis(Utc::now());
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            "UPDATE tasks SET status = 'failed', \
                 completed_at = MAX(?2, COALESCE(started_at, created_at)), \
                 duration_ms = MAX(?2 - COALESCE(started_at, created_at), 0), \
                 error_message = ?3 \
             WHERE id = ?1 AND status = 'running' AND (?4 IS NULL OR claimed_by = ?4) \
             RETURNING COALESCE(claimed_by, recipient) AS role",
        )
        .bind(id)
        .bind(now)
        .bind(error_message)
        .bind(claimant)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Err(QueueError::TaskNotFound { id: id.to_string() });
        };
        let role: String = row.try_get("role")?;
        insert_event(
            &mut tx,
            id,
            &role,
            Some(TaskStatus::Running),
            TaskStatus::Failed,
            now,
            Some(error_message),
        )
        .await?;
        tx.commit().await?;

        warn!(task_id = %id, role = %role, error = %error_message, "Task failed");
        Ok(())
    }

    /// Demote every `running` task of `recipient` back to `queued`.
    ///
    /// Only call once the recipient's process is known to be gone.
    pub async fn requeue_running(&self, recipient: &str, reason: &str) -> Result<u64, QueueError> {
        let now = millis(Utc::now());
        let mut tx = self.pool.begin().await?;
        let rows = sqlx::query(
            "UPDATE tasks SET status = 'queued', started_at = NULL, claimed_by = NULL \
             WHERE recipient = ?1 AND status = 'running' RETURNING id",
        )
        .bind(recipient)
        .fetch_all(&mut *tx)
        .await?;

        for row in &rows {
            let id: String = row.try_get("id")?;
            insert_event(&mut tx, &id, recipient, Some(TaskStatus::Running), TaskStatus::Queued, now, Some(reason))
                .await?;
        }
        tx.commit().await?;

        if !rows.is_empty() {
            warn!(recipient = %recipient, count = rows.len(), reason = %reason, "Requeued running tasks");
        }
        Ok(rows.len() as u64)
    }

    /// Requeue running tasks whose recipient has not heartbeated within `heartbeat_timeout`
    pub async fn reclaim_stale(&self, heartbeat_timeout: Duration) -> Result<u64, QueueError> {
        let now = Utc::now();
        let cutoff = millis(now) - heartbeat_timeout.as_millis() as i64;
        let mut tx = self.pool.begin().await?;
        let rows = sqlx::query(
            "UPDATE tasks SET status = 'queued', started_at = NULL, claimed_by = NULL \
             WHERE status = 'running' AND started_at < ?1 \
               AND NOT EXISTS (SELECT 1 FROM worker_heartbeats h \
                               WHERE h.role = tasks.recipient AND h.beat_at >= ?1) \
             RETURNING id, recipient",
        )
        .bind(cutoff)
        .fetch_all(&mut *tx)
        .await?;

        for row in &rows {
            let id: String = row.try_get("id")?;
            let recipient: String = row.try_get("recipient")?;
            insert_event(
                &mut tx,
                &id,
                &recipient,
                Some(TaskStatus::Running),
                TaskStatus::Queued,
                millis(now),
                Some("heartbeat timeout"),
            )
            .await?;
        }
        tx.commit().await?;

        if !rows.is_empty() {
            warn!(count = rows.len(), "Reclaimed stale running tasks");
        }
        Ok(rows.len() as u64)
    }

    /// Append a metric sample
    pub async fn record_metric(&self, role: &str, name: &str, value: f64) -> Result<(), QueueError> {
        sqlx::query(
            "INSERT INTO agent_metrics (role, metric_name, metric_value, timestamp) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(role)
        .bind(name)
        .bind(value)
        .bind(millis(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Delete terminal tasks and metric samples older than `days`; returns rows deleted
    pub async fn cleanup_older_than(&self, days: u32) -> Result<u64, QueueError> {
        Ok(self.cleanup_report(days).await?.deleted())
    }

    /// Same as [`TaskQueue::cleanup_older_than`] with a per-table breakdown
    pub async fn cleanup_report(&self, days: u32) -> Result<CleanupStats, QueueError> {
        let cutoff = millis(Utc::now()) - days as i64 * MS_PER_DAY;
        let mut tx = self.pool.begin().await?;

        let tasks = sqlx::query(
            "DELETE FROM tasks WHERE status IN ('completed', 'failed') \
             AND COALESCE(completed_at, created_at) < ?1",
        )
        .bind(cutoff)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let metrics = sqlx::query("DELETE FROM agent_metrics WHERE timestamp < ?1")
            .bind(cutoff)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let events = sqlx::query("DELETE FROM task_events WHERE at < ?1")
            .bind(cutoff)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let delegations = sqlx::query("DELETE FROM delegations WHERE at < ?1")
            .bind(cutoff)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;

        let stats = CleanupStats {
            tasks,
            metrics,
            events,
            delegations,
        };
        info!(
            days,
            tasks, metrics, events, delegations, "Cleaned up coordination history"
        );
        Ok(stats)
    }
}

async fn insert_task(tx: &mut Transaction<'_, Sqlite>, task: NewTask) -> Result<Task, QueueError> {
    let priority = Priority::new(task.priority).ok_or(QueueError::InvalidPriority {
        value: task.priority,
    })?;
    if task.recipient.trim().is_empty() {
        return Err(QueueError::EmptyRecipient);
    }

    let created_at = Utc::now();
    let queued = Task {
        id: Uuid::new_v4().to_string(),
        sender: task.sender,
        recipient: task.recipient,
        task_type: task.task_type,
        priority,
        status: TaskStatus::Queued,
        payload: task.payload,
        created_at,
        started_at: None,
        completed_at: None,
        duration_ms: None,
        error: None,
        claimed_by: None,
    };

    sqlx::query(
        "INSERT INTO tasks (id, sender, recipient, type, priority, status, payload, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, 'queued', ?6, ?7)",
    )
    .bind(&queued.id)
    .bind(&queued.sender)
    .bind(&queued.recipient)
    .bind(&queued.task_type)
    .bind(priority.value() as i64)
    .bind(serde_json::to_string(&queued.payload)?)
    .bind(millis(created_at))
    .execute(&mut **tx)
    .await?;

    insert_event(tx, &queued.id, &queued.sender, None, TaskStatus::Queued, millis(created_at), None)
        .await?;
    Ok(queued)
}

async fn insert_event(
    tx: &mut Transaction<'_, Sqlite>,
    task_id: &str,
    role: &str,
    from: Option<TaskStatus>,
    to: TaskStatus,
    at: i64,
    detail: Option<&str>,
) -> Result<(), QueueError> {
    sqlx::query(
        "INSERT INTO task_events (task_id, role, from_status, to_status, at, detail) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )
    .bind(task_id)
    .bind(role)
    .bind(from.map(TaskStatus::as_str))
    .bind(to.as_str())
    .bind(at)
    .bind(detail)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub(crate) fn task_from_row(row: &SqliteRow) -> Result<Task, QueueError> {
    let raw_priority: i64 = row.try_get("priority")?;
    let priority = Priority::new(raw_priority).ok_or_else(|| QueueError::CorruptRow {
        reason: format!("priority {raw_priority} out of range"),
    })?;
    let status: String = row.try_get("status")?;
    let payload: String = row.try_get("payload")?;

    Ok(Task {
        id: row.try_get("id")?,
        sender: row.try_get("sender")?,
        recipient: row.try_get("recipient")?,
        task_type: row.try_get("type")?,
        priority,
        status: status.parse()?,
        payload: serde_json::from_str(&payload)?,
        created_at: from_millis(row.try_get("created_at")?),
        started_at: row.try_get::<Option<i64>, _>("started_at")?.map(from_millis),
        completed_at: row.try_get::<Option<i64>, _>("completed_at")?.map(from_millis),
        duration_ms: row.try_get("duration_ms")?,
        error: row.try_get("error_message")?,
        claimed_by: row.try_get("claimed_by")?,
    })
}

pub(crate) fn millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}
