use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{error, warn};

use super::lifecycle::RolePhase;

/// Snapshot of one managed role, published after every supervisor pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleStatus {
    pub role: String,
    pub phase: RolePhase,
    pub pid: Option<u32>,
    pub restarts: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub hostname: String,
    pub updated_at: DateTime<Utc>,
}

/// Alert raised when a role exhausts its restart budget
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleFailureAlert {
    pub role: String,
    pub attempts: u32,
    pub last_error: String,
    pub hostname: String,
    pub at: DateTime<Utc>,
}

/// Destination for role status snapshots
pub trait StatusSink: Send + Sync {
    fn publish(&self, status: &RoleStatus) -> io::Result<()>;
}

/// Receives alerts that need an operator
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn role_failed(&self, alert: &RoleFailureAlert);
}

/// Writes `<role>.json` into a directory, replacing the file atomically
#[derive(Debug, Clone)]
pub struct JsonStatusDir {
    dir: PathBuf,
}

impl JsonStatusDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Read every status file in `dir`, sorted by role. Unreadable files are skipped.
    pub fn read_all(dir: &Path) -> io::Result<Vec<RoleStatus>> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut statuses = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match fs::read(&path).map(|bytes| serde_json::from_slice::<RoleStatus>(&bytes)) {
                Ok(Ok(status)) => statuses.push(status),
                Ok(Err(e)) => warn!(path = %path.display(), error = %e, "Skipping malformed status file"),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable status file"),
            }
        }
        statuses.sort_by(|a, b| a.role.cmp(&b.role));
        Ok(statuses)
    }
}

impl StatusSink for JsonStatusDir {
    fn publish(&self, status: &RoleStatus) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        let target = self.dir.join(format!("{}.json", status.role));
        let tmp = self.dir.join(format!(".{}.json.tmp", status.role));
        fs::write(&tmp, serde_json::to_vec_pretty(status)?)?;
        fs::rename(tmp, target)
    }
}

/// Appends alerts to a JSON-lines file and logs them at error level
#[derive(Debug, Clone)]
pub struct AlertLog {
    path: PathBuf,
}

impl AlertLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn append(&self, alert: &RoleFailureAlert) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut line = serde_json::to_vec(alert)?;
        line.push(b'\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await
    }
}

#[async_trait]
impl Notifier for AlertLog {
    async fn role_failed(&self, alert: &RoleFailureAlert) {
        error!(
            role = %alert.role,
            attempts = alert.attempts,
            last_error = %alert.last_error,
            host = %alert.hostname,
            "Role failed permanently; operator action required"
        );
        if let Err(e) = self.append(alert).await {
            warn!(path = %self.path.display(), error = %e, "Failed to write alert");
        }
    }
}

pub fn local_hostname() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string())
}
