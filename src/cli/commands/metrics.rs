use anyhow::Result;
use std::path::PathBuf;

use super::CommandContext;
use crate::metrics::{MetricsReporter, MetricsStore};

pub struct MetricsCommand {
    pub role: Option<String>,
    pub samples: u32,
    pub export: Option<PathBuf>,
}

impl MetricsCommand {
    pub fn new(role: Option<String>, samples: u32, export: Option<PathBuf>) -> Self {
        Self { role, samples, export }
    }

    pub async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        let store = MetricsStore::new(ctx.queue().await?);

        if let Some(path) = &self.export {
            let snapshot = store.export_json(path).await?;
            if !ctx.json {
                println!(
                    "📁 Wrote snapshot of {} roles to {}",
                    snapshot.role_performance.len(),
                    path.display()
                );
            }
            return Ok(());
        }

        let roles: Vec<String> = match &self.role {
            Some(role) => vec![role.clone()],
            None => store
                .role_performance()
                .await?
                .into_iter()
                .map(|perf| perf.role)
                .collect(),
        };

        let mut reports = Vec::with_capacity(roles.len());
        for role in &roles {
            reports.push(store.role_report(role, self.samples).await?);
        }

        if ctx.json {
            ctx.print_json(&reports)?;
        } else if reports.is_empty() {
            println!("📊 No task history yet");
        } else {
            for report in &reports {
                println!("{}", MetricsReporter::format_role_report(report));
            }
        }
        Ok(())
    }
}
