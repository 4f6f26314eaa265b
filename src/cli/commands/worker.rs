use anyhow::Result;

use super::CommandContext;
use crate::config::RoleConfig;
use crate::shutdown::ShutdownCoordinator;
use crate::worker::WorkerRuntime;

pub struct WorkerCommand {
    pub role: String,
}

impl WorkerCommand {
    pub fn new(role: String) -> Self {
        Self { role }
    }

    pub async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        let role = match ctx.config.role(&self.role) {
            Some(role) => role.clone(),
            None => {
                tracing::warn!(role = %self.role, "Role is not configured; tasks will only be acknowledged");
                RoleConfig::new(self.role.clone())
            }
        };

        let database = ctx.database().await?;
        let runtime = WorkerRuntime::from_config(
            &ctx.config,
            &role,
            ctx.registry()?,
            crate::queue::TaskQueue::new(&database),
        );

        let shutdown = ShutdownCoordinator::new();
        shutdown.install_signal_handlers()?;

        let summary = runtime.run(shutdown.subscribe()).await?;
        database.shutdown().await;

        if ctx.json {
            ctx.print_json(&summary)?;
        }
        Ok(())
    }
}
