use anyhow::Result;

use super::CommandContext;

pub struct CleanupCommand {
    pub days: Option<u32>,
}

impl CleanupCommand {
    pub fn new(days: Option<u32>) -> Self {
        Self { days }
    }

    pub async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        let days = self.days.unwrap_or(ctx.config.database.retention_days);
        let queue = ctx.queue().await?;
        let stats = queue.cleanup_report(days).await?;

        if ctx.json {
            ctx.print_json(&stats)?;
        } else {
            println!(
                "🧹 Deleted {} rows older than {days} days ({} tasks, {} samples, {} events, {} delegations)",
                stats.deleted(),
                stats.tasks,
                stats.metrics,
                stats.events,
                stats.delegations
            );
        }
        Ok(())
    }
}
