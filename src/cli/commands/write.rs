use anyhow::{bail, Context, Result};
use std::sync::Arc;

use super::CommandContext;
use crate::ownership::{normalize_path, OwnershipGate, WriteRoute, WriteRouter};

/// Entry point for workers (and operators) that want to modify a shared path
pub struct WriteCommand {
    pub role: String,
    pub path: String,
    pub payload: Option<String>,
}

impl WriteCommand {
    pub fn new(role: String, path: String, payload: Option<String>) -> Self {
        Self { role, path, payload }
    }

    pub async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        let payload = match &self.payload {
            Some(raw) => serde_json::from_str(raw).context("--payload must be valid JSON")?,
            None => serde_json::Value::Null,
        };

        let gate = OwnershipGate::from_rules(
            ctx.config.ownership.rules.clone(),
            ctx.config.ownership.default_owner.clone(),
        )?;
        let router = WriteRouter::new(Arc::new(gate), ctx.queue().await?);
        let route = router.route_write(&self.role, &self.path, payload).await?;

        if ctx.json {
            ctx.print_json(&route)?;
        } else {
            let path = normalize_path(&self.path);
            match &route {
                WriteRoute::Proceed => println!("✅ {} may write {path}", self.role),
                WriteRoute::Delegated { owner, task_id } => {
                    println!("↪️  {path} belongs to {owner}; queued delegated write {task_id}")
                }
                WriteRoute::Refused { .. } => {}
            }
        }

        if let WriteRoute::Refused { reason } = route {
            bail!("{} may not write {}: {reason}", self.role, self.path);
        }
        Ok(())
    }
}
