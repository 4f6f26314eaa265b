use anyhow::Result;
use serde_json::json;

use super::CommandContext;
use crate::ownership::{escapes_root, normalize_path, OwnershipGate, WriteDecision};

pub struct OwnerCommand {
    pub path: String,
    pub role: Option<String>,
}

impl OwnerCommand {
    pub fn new(path: String, role: Option<String>) -> Self {
        Self { path, role }
    }

    pub async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        let gate = OwnershipGate::from_rules(
            ctx.config.ownership.rules.clone(),
            ctx.config.ownership.default_owner.clone(),
        )?;
        let path = normalize_path(&self.path);
        let owner = gate.owner_of(&path);
        let decision = self
            .role
            .as_deref()
            .map(|role| gate.check_write(role, &path));

        if ctx.json {
            ctx.print_json(&json!({
                "path": path,
                "owner": owner,
                "role": self.role,
                "decision": decision,
            }))?;
            return Ok(());
        }

        match &owner {
            Some(owner) => println!("🔐 {path} is owned by {owner}"),
            None if escapes_root(&path) => println!("⛔ {path} is outside the repository root"),
            None => println!("🔓 {path} has no owner"),
        }
        if let (Some(role), Some(decision)) = (&self.role, &decision) {
            match decision {
                WriteDecision::Allowed => println!("   ✅ {role} may write it"),
                WriteDecision::Delegate { owner } => {
                    println!("   ↪️  {role} must delegate the write to {owner}")
                }
                WriteDecision::Refused { reason } => println!("   ⛔ {role} may not write it: {reason}"),
            }
        }
        Ok(())
    }
}
