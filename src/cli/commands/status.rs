use anyhow::Result;
use serde::Serialize;

use super::CommandContext;
use crate::registry::WorkerRegistration;
use crate::supervisor::{JsonStatusDir, RoleStatus};

#[derive(Serialize)]
struct RegistrationView {
    #[serde(flatten)]
    registration: WorkerRegistration,
    alive: bool,
}

#[derive(Serialize)]
struct StatusView {
    registrations: Vec<RegistrationView>,
    roles: Vec<RoleStatus>,
}

pub struct StatusCommand;

impl StatusCommand {
    pub fn new() -> Self {
        Self
    }

    pub async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        let registrations = ctx
            .registry()?
            .list()?
            .into_iter()
            .map(|registration| RegistrationView {
                alive: registration.is_alive(),
                registration,
            })
            .collect();
        let roles = JsonStatusDir::read_all(&ctx.config.status_dir())?;
        let view = StatusView { registrations, roles };

        if ctx.json {
            return ctx.print_json(&view);
        }

        println!("🗂️  REGISTERED PROCESSES");
        if view.registrations.is_empty() {
            println!("   none");
        }
        for entry in &view.registrations {
            let marker = if entry.alive { "🟢" } else { "🔴" };
            println!(
                "   {marker} {:<16} pid {:<8} since {}",
                entry.registration.role,
                entry.registration.pid,
                entry.registration.started_at.format("%Y-%m-%d %H:%M:%S")
            );
        }

        println!();
        println!("🧭 ROLES");
        if view.roles.is_empty() {
            println!("   no status published yet");
        }
        for role in &view.roles {
            print!(
                "   {:<16} {:<9} restarts {}",
                role.role, role.phase.to_string(), role.restarts
            );
            if let Some(pid) = role.pid {
                print!("  pid {pid}");
            }
            if let Some(beat) = role.last_heartbeat {
                print!("  last beat {}", beat.format("%H:%M:%S"));
            }
            if let Some(error) = &role.last_error {
                print!("  ({error})");
            }
            println!();
        }
        Ok(())
    }
}
