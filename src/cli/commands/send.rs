use anyhow::{Context, Result};

use super::CommandContext;
use crate::queue::NewTask;

pub struct SendCommand {
    pub to: String,
    pub task_type: String,
    pub from: String,
    pub priority: i64,
    pub payload: Option<String>,
}

impl SendCommand {
    pub fn new(to: String, task_type: String, from: String, priority: i64, payload: Option<String>) -> Self {
        Self {
            to,
            task_type,
            from,
            priority,
            payload,
        }
    }

    pub async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        let payload = match &self.payload {
            Some(raw) => serde_json::from_str(raw).context("--payload must be valid JSON")?,
            None => serde_json::Value::Null,
        };

        let queue = ctx.queue().await?;
        let task = queue
            .send(
                NewTask::new(&self.from, &self.to, &self.task_type)
                    .with_priority(self.priority)
                    .with_payload(payload),
            )
            .await?;

        if ctx.json {
            ctx.print_json(&task)?;
        } else {
            println!("📨 Queued {} for {} ({}): {}", task.task_type, task.recipient, task.priority, task.id);
        }
        Ok(())
    }
}
