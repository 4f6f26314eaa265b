use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod commands;

#[derive(Parser)]
#[command(name = "switchboard")]
#[command(about = "Coordination core for cooperating worker processes")]
#[command(long_about = "Switchboard runs one worker process per role, routes tasks between them through a \
                       durable priority queue, and keeps every shared path owned by exactly one role. \
                       Start with 'switchboard supervise' and hand out work with 'switchboard send'.")]
pub struct Cli {
    /// Configuration file (defaults to switchboard.toml / .switchboard-rc in the current directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the process supervisor for every configured role
    Supervise,
    /// Serve a single role (normally spawned by the supervisor)
    Worker {
        #[arg(long, help = "Role this worker serves")]
        role: String,
    },
    /// Queue a task for a role
    Send {
        #[arg(long, help = "Recipient role")]
        to: String,
        #[arg(long = "type", help = "Task type understood by the recipient")]
        task_type: String,
        #[arg(long, default_value = "operator", help = "Sender recorded on the task")]
        from: String,
        #[arg(long, default_value = "5", help = "Priority 1 (highest) to 10 (lowest)")]
        priority: i64,
        #[arg(long, help = "JSON payload")]
        payload: Option<String>,
    },
    /// Show queued tasks per role and priority bucket
    Queue,
    /// Show role performance and latest metric samples
    Metrics {
        #[arg(long, help = "Restrict to one role")]
        role: Option<String>,
        #[arg(long, default_value = "10", help = "Number of latest samples to show per role")]
        samples: u32,
        #[arg(long, help = "Write a full JSON snapshot to this file")]
        export: Option<PathBuf>,
    },
    /// Show the slowest completed tasks and detected bottlenecks
    Bottlenecks {
        #[arg(long, default_value = "10", help = "Number of tasks to show (max 100)")]
        limit: u32,
    },
    /// Show recent task state transitions
    Events {
        #[arg(long, default_value = "20", help = "Number of transitions to show")]
        tail: u32,
    },
    /// Delete finished tasks and samples older than the retention window
    Cleanup {
        #[arg(long, help = "Retention window in days (defaults to database.retention_days)")]
        days: Option<u32>,
    },
    /// Return a role's running tasks to the queue
    Reclaim {
        #[arg(long, help = "Role whose running tasks are requeued")]
        role: String,
        #[arg(long, help = "Reclaim even if a live worker is registered for the role")]
        force: bool,
    },
    /// Show which role owns a path, and whether a role may write it
    Owner {
        /// Path relative to the repository root
        path: String,
        #[arg(long, help = "Check write access for this role")]
        role: Option<String>,
    },
    /// Request a write of a path: proceed if the role owns it, otherwise queue it for the owner
    Write {
        #[arg(long, help = "Role requesting the write")]
        role: String,
        #[arg(long, help = "Path relative to the repository root")]
        path: String,
        #[arg(long, help = "JSON payload handed to the owner with a delegated write")]
        payload: Option<String>,
    },
    /// Show registered workers and supervisor role status
    Status,
}
