use anyhow::Result;
use serde::Serialize;
use std::path::PathBuf;

use crate::config::SwitchboardConfig;
use crate::database::DatabaseManager;
use crate::queue::TaskQueue;
use crate::registry::SingletonRegistry;

pub mod bottlenecks;
pub mod cleanup;
pub mod events;
pub mod metrics;
pub mod owner;
pub mod queue;
pub mod reclaim;
pub mod send;
pub mod status;
pub mod supervise;
pub mod worker;
pub mod write;

/// What every command gets from the command line and configuration
pub struct CommandContext {
    pub config: SwitchboardConfig,
    pub config_path: Option<PathBuf>,
    pub json: bool,
}

impl CommandContext {
    pub fn new(config: SwitchboardConfig, config_path: Option<PathBuf>, json: bool) -> Self {
        Self {
            config,
            config_path,
            json,
        }
    }

    pub async fn database(&self) -> Result<DatabaseManager> {
        Ok(DatabaseManager::new(&self.config.database).await?)
    }

    pub async fn queue(&self) -> Result<TaskQueue> {
        Ok(TaskQueue::new(&self.database().await?))
    }

    pub fn registry(&self) -> Result<SingletonRegistry> {
        Ok(SingletonRegistry::open(self.config.data_dir())?)
    }

    pub fn print_json<T: Serialize>(&self, value: &T) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }
}
