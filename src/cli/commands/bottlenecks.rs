use anyhow::Result;
use serde_json::json;

use super::CommandContext;
use crate::metrics::{MetricsReporter, MetricsStore};

pub struct BottlenecksCommand {
    pub limit: u32,
}

impl BottlenecksCommand {
    pub fn new(limit: u32) -> Self {
        Self { limit }
    }

    pub async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        let store = MetricsStore::new(ctx.queue().await?);
        let (slowest, bottlenecks) = store.bottlenecks(self.limit).await?;

        if ctx.json {
            ctx.print_json(&json!({
                "slowest_tasks": slowest,
                "bottlenecks": bottlenecks,
            }))?;
        } else {
            print!("{}", MetricsReporter::format_slowest(&slowest, &bottlenecks));
        }
        Ok(())
    }
}
