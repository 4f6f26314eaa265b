use anyhow::Result;

use super::CommandContext;
use crate::metrics::{MetricsReporter, MetricsStore};

pub struct EventsCommand {
    pub tail: u32,
}

impl EventsCommand {
    pub fn new(tail: u32) -> Self {
        Self { tail }
    }

    pub async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        let store = MetricsStore::new(ctx.queue().await?);
        let events = store.recent_events(self.tail).await?;

        if ctx.json {
            ctx.print_json(&events)?;
        } else if events.is_empty() {
            println!("📜 No task transitions recorded");
        } else {
            print!("{}", MetricsReporter::format_events(&events));
        }
        Ok(())
    }
}
