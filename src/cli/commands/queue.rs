use anyhow::Result;

use super::CommandContext;
use crate::metrics::{MetricsReporter, MetricsStore};

pub struct QueueCommand;

impl QueueCommand {
    pub fn new() -> Self {
        Self
    }

    pub async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        let store = MetricsStore::new(ctx.queue().await?);
        let depth = store.queue_depth().await?;

        if ctx.json {
            ctx.print_json(&depth)?;
        } else {
            print!("{}", MetricsReporter::format_queue_depth(&depth));
        }
        Ok(())
    }
}
