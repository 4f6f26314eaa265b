use anyhow::Result;
use clap::Parser;

use switchboard::cli::commands::{
    bottlenecks::BottlenecksCommand, cleanup::CleanupCommand, events::EventsCommand,
    metrics::MetricsCommand, owner::OwnerCommand, queue::QueueCommand, reclaim::ReclaimCommand,
    send::SendCommand, status::StatusCommand, supervise::SuperviseCommand, worker::WorkerCommand,
    write::WriteCommand, CommandContext,
};
use switchboard::cli::{Cli, Commands};
use switchboard::config::SwitchboardConfig;
use switchboard::telemetry::{init_telemetry, shutdown_telemetry};

fn main() -> Result<()> {
    let cli = Cli::parse();

    SwitchboardConfig::load_env_file()?;
    let config = match &cli.config {
        Some(path) => SwitchboardConfig::load_from(path)?,
        None => SwitchboardConfig::load()?,
    };
    init_telemetry(&config.observability)?;

    let ctx = CommandContext::new(config, cli.config.clone(), cli.json);
    let result = tokio::runtime::Runtime::new()?.block_on(async move {
        match cli.command {
            Commands::Supervise => SuperviseCommand::new().execute(&ctx).await,
            Commands::Worker { role } => WorkerCommand::new(role).execute(&ctx).await,
            Commands::Send {
                to,
                task_type,
                from,
                priority,
                payload,
            } => {
                SendCommand::new(to, task_type, from, priority, payload)
                    .execute(&ctx)
                    .await
            }
            Commands::Queue => QueueCommand::new().execute(&ctx).await,
            Commands::Metrics {
                role,
                samples,
                export,
            } => MetricsCommand::new(role, samples, export).execute(&ctx).await,
            Commands::Bottlenecks { limit } => BottlenecksCommand::new(limit).execute(&ctx).await,
            Commands::Events { tail } => EventsCommand::new(tail).execute(&ctx).await,
            Commands::Cleanup { days } => CleanupCommand::new(days).execute(&ctx).await,
            Commands::Reclaim { role, force } => ReclaimCommand::new(role, force).execute(&ctx).await,
            Commands::Owner { path, role } => OwnerCommand::new(path, role).execute(&ctx).await,
            Commands::Write { role, path, payload } => {
                WriteCommand::new(role, path, payload).execute(&ctx).await
            }
            Commands::Status => StatusCommand::new().execute(&ctx).await,
        }
    });

    shutdown_telemetry();
    result
}
