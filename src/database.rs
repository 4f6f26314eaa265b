use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::DatabaseConfig;

/// Database manager for the shared coordination store.
///
/// Every worker process opens its own pool against the same SQLite file.
/// WAL mode lets readers proceed while SQLite serialises writers, which is the
/// single-writer-per-row guarantee the queue relies on.
#[derive(Clone)]
pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    /// Open (creating if needed) the database and run embedded migrations
    pub async fn new(config: &DatabaseConfig) -> Result<Self, sqlx::Error> {
        let url = if config.url.starts_with("sqlite:") {
            config.url.clone()
        } else {
            if let Some(parent) = Path::new(&config.url).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            format!("sqlite://{}", config.url)
        };

        let options = SqliteConnectOptions::from_str(&url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_millis(config.busy_timeout_ms))
            .foreign_keys(true);

        debug!(url = %url, "Connecting to coordination database");
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        info!(url = %url, "Coordination database ready");

        Ok(Self { pool })
    }

    /// Open a database file at `path` with default pool settings
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, sqlx::Error> {
        let config = DatabaseConfig {
            url: path.as_ref().to_string_lossy().into_owned(),
            ..DatabaseConfig::default()
        };
        Self::new(&config).await
    }

    /// Get database pool for queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close database connections gracefully
    pub async fn shutdown(&self) {
        info!("Shutting down database connections...");
        self.pool.close().await;
        info!("Database connections closed");
    }
}
