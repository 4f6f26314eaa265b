use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

use crate::database::DatabaseManager;
use crate::queue::task_queue::{from_millis, millis};
use crate::queue::QueueError;

/// Last liveness signal written by a worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub role: String,
    pub pid: u32,
    pub beat_at: DateTime<Utc>,
}

/// Heartbeats live in the coordination database so workers and the supervisor
/// need no extra channel between them.
#[derive(Clone)]
pub struct HeartbeatStore {
    pool: SqlitePool,
}

impl HeartbeatStore {
    pub fn new(database: &DatabaseManager) -> Self {
        Self {
            pool: database.pool().clone(),
        }
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn beat(&self, role: &str, pid: u32) -> Result<(), QueueError> {
        sqlx::query(
            "INSERT INTO worker_heartbeats (role, pid, beat_at) VALUES (?1, ?2, ?3) \
             ON CONFLICT(role) DO UPDATE SET pid = excluded.pid, beat_at = excluded.beat_at",
        )
        .bind(role)
        .bind(pid as i64)
        .bind(millis(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn last_beat(&self, role: &str) -> Result<Option<Heartbeat>, QueueError> {
        let row = sqlx::query("SELECT role, pid, beat_at FROM worker_heartbeats WHERE role = ?1")
            .bind(role)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| -> Result<Heartbeat, QueueError> {
            Ok(Heartbeat {
                role: row.try_get("role")?,
                pid: row.try_get::<i64, _>("pid")? as u32,
                beat_at: from_millis(row.try_get("beat_at")?),
            })
        })
        .transpose()
    }

    /// Remove the heartbeat row if it still belongs to `pid`
    pub async fn clear(&self, role: &str, pid: u32) -> Result<(), QueueError> {
        sqlx::query("DELETE FROM worker_heartbeats WHERE role = ?1 AND pid = ?2")
            .bind(role)
            .bind(pid as i64)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
