use anyhow::Result;
use tracing::info;

use super::CommandContext;
use crate::shutdown::ShutdownCoordinator;
use crate::supervisor::ProcessSupervisor;

pub struct SuperviseCommand;

impl SuperviseCommand {
    pub fn new() -> Self {
        Self
    }

    pub async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        if ctx.config.roles.is_empty() {
            anyhow::bail!("No roles configured; add [[roles]] entries to switchboard.toml");
        }

        let database = ctx.database().await?;
        let registry = ctx.registry()?;
        let queue = crate::queue::TaskQueue::new(&database);

        let mut supervisor = ProcessSupervisor::new(&ctx.config, registry, queue);
        if let Some(path) = &ctx.config_path {
            supervisor = supervisor.with_config_path(path.canonicalize()?);
        }

        let shutdown = ShutdownCoordinator::new();
        shutdown.install_signal_handlers()?;
        info!(roles = ctx.config.roles.len(), "Starting supervisor");

        supervisor.run(shutdown.subscribe()).await?;
        database.shutdown().await;
        Ok(())
    }
}
