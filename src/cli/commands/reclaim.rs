use anyhow::{bail, Result};
use serde_json::json;

use super::CommandContext;

pub struct ReclaimCommand {
    pub role: String,
    pub force: bool,
}

impl ReclaimCommand {
    pub fn new(role: String, force: bool) -> Self {
        Self { role, force }
    }

    pub async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        if let Some(live) = ctx.registry()?.live(&self.role)? {
            if !self.force {
                bail!(
                    "Role '{}' has a live worker (pid {}, since {}); pass --force to reclaim anyway",
                    self.role,
                    live.pid,
                    live.started_at
                );
            }
            tracing::warn!(role = %self.role, pid = live.pid, "Reclaiming tasks from a live worker");
        }

        let queue = ctx.queue().await?;
        let requeued = queue.requeue_running(&self.role, "manual reclaim").await?;

        if ctx.json {
            ctx.print_json(&json!({ "role": self.role, "requeued": requeued }))?;
        } else {
            println!("♻️  Requeued {requeued} running tasks for {}", self.role);
        }
        Ok(())
    }
}
