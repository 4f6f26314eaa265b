//! Worker runtime: the process that serves one role.
//!
//! A worker owns its role's singleton registration for its whole life, writes a
//! heartbeat on a fixed interval, and drains its queue one task at a time.

pub mod handler;

pub use handler::{CommandHandler, LogHandler, TaskHandler};

use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

use crate::config::{RoleConfig, SwitchboardConfig};
use crate::queue::{QueueError, RetryConfig, TaskQueue};
use crate::registry::{RegistryError, RoleGuard, SingletonRegistry};
use crate::shutdown::wait_for;
use crate::supervisor::HeartbeatStore;
use crate::telemetry::create_coordination_span;

/// Metric sample recorded for every finished task
pub const TASK_DURATION_METRIC: &str = "task_duration_ms";

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("Task handler failed: {0}")]
    Handler(String),

    /// The handler ran but its outcome never reached the queue
    #[error("Outcome of task {task_id} could not be recorded: {source}")]
    Unrecorded {
        task_id: String,
        #[source]
        source: QueueError,
    },
}

/// Result of executing a single claimed task
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TaskOutcome {
    Completed { task_id: String, duration_ms: i64 },
    Failed { task_id: String, error: String },
}

/// Totals for one worker session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerSummary {
    pub completed: u64,
    pub failed: u64,
}

pub struct WorkerRuntime {
    role: String,
    registry: SingletonRegistry,
    queue: TaskQueue,
    heartbeats: HeartbeatStore,
    handler: Arc<dyn TaskHandler>,
    poll_interval: Duration,
    heartbeat_interval: Duration,
    retry: RetryConfig,
}

impl WorkerRuntime {
    pub fn new(
        role: impl Into<String>,
        registry: SingletonRegistry,
        queue: TaskQueue,
        handler: Arc<dyn TaskHandler>,
    ) -> Self {
        let defaults = SwitchboardConfig::default();
        let heartbeats = HeartbeatStore::from_pool(queue.pool().clone());
        Self {
            role: role.into(),
            registry,
            queue,
            heartbeats,
            handler,
            poll_interval: RoleConfig::default().poll_interval(),
            heartbeat_interval: defaults.supervisor.heartbeat_interval(),
            retry: RetryConfig::default(),
        }
    }

    /// Worker for `role` with its configured handler and intervals
    pub fn from_config(
        config: &SwitchboardConfig,
        role: &RoleConfig,
        registry: SingletonRegistry,
        queue: TaskQueue,
    ) -> Self {
        let handler: Arc<dyn TaskHandler> = match CommandHandler::from_argv(&role.handler) {
            Some(handler) => Arc::new(handler.with_env(role.env.clone())),
            None => Arc::new(LogHandler),
        };
        Self::new(role.name.clone(), registry, queue, handler)
            .with_poll_interval(role.poll_interval())
            .with_heartbeat_interval(config.supervisor.heartbeat_interval())
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Retry policy for recording task outcomes
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    /// Claim and execute at most one task. `None` when the queue is empty.
    pub async fn run_once(&self) -> Result<Option<TaskOutcome>, WorkerError> {
        let Some(task) = self.queue.claim_next(&self.role, &self.role).await? else {
            return Ok(None);
        };

        let span = create_coordination_span(
            "execute_task",
            Some(self.role.as_str()),
            Some(std::process::id()),
            Some(task.id.as_str()),
        );
        let started = Instant::now();
        let result = self.handler.handle(&task).instrument(span).await;
        let duration_ms = started.elapsed().as_millis() as i64;

        let recorded = match &result {
            Ok(()) => {
                self.retry
                    .run("mark_completed", || {
                        self.queue.mark_completed_as(&task.id, &self.role, duration_ms)
                    })
                    .await
            }
            Err(e) => {
                let error = e.to_string();
                self.retry
                    .run("mark_failed", || self.queue.mark_failed_as(&task.id, &self.role, &error))
                    .await
            }
        };
        match recorded {
            Ok(()) => {}
            // reclaimed from under us (e.g. `reclaim --force`); the new claimant reports
            Err(source @ QueueError::TaskNotFound { .. }) => return Err(WorkerError::Queue(source)),
            Err(source) => {
                return Err(WorkerError::Unrecorded {
                    task_id: task.id,
                    source,
                })
            }
        }

        if let Err(e) = self
            .queue
            .record_metric(&self.role, TASK_DURATION_METRIC, duration_ms as f64)
            .await
        {
            warn!(task_id = %task.id, error = %e, "Failed to record task duration");
        }

        Ok(Some(match result {
            Ok(()) => TaskOutcome::Completed {
                task_id: task.id,
                duration_ms,
            },
            Err(e) => TaskOutcome::Failed {
                task_id: task.id,
                error: e.to_string(),
            },
        }))
    }

    /// Serve the role until `shutdown` flips. The task in flight always finishes first.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<WorkerSummary, WorkerError> {
        let guard = self.registry.register(&self.role)?;
        let span = create_coordination_span("worker", Some(self.role.as_str()), Some(guard.pid()), None);
        self.serve(guard, shutdown).instrument(span).await
    }

    async fn serve(
        self,
        mut guard: RoleGuard,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<WorkerSummary, WorkerError> {
        let pid = guard.pid();
        self.heartbeats.beat(&self.role, pid).await?;
        let heartbeat = self.spawn_heartbeat(pid, shutdown.clone());
        info!(
            poll_ms = self.poll_interval.as_millis() as u64,
            heartbeat_secs = self.heartbeat_interval.as_secs(),
            "Worker started"
        );

        let mut summary = WorkerSummary::default();
        let mut fatal = None;
        while !*shutdown.borrow() {
            match self.run_once().await {
                Ok(Some(TaskOutcome::Completed { .. })) => {
                    summary.completed += 1;
                    continue;
                }
                Ok(Some(TaskOutcome::Failed { .. })) => {
                    summary.failed += 1;
                    continue;
                }
                Ok(None) => {}
                // exit so the task is requeued once this process is gone
                Err(e @ WorkerError::Unrecorded { .. }) => {
                    error!(error = %e, "Stopping worker: task outcome was lost");
                    fatal = Some(e);
                    break;
                }
                // usually a busy database; try again next poll
                Err(e) => warn!(error = %e, "Queue poll failed"),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = wait_for(&mut shutdown) => {}
            }
        }

        heartbeat.abort();
        if let Err(e) = self.heartbeats.clear(&self.role, pid).await {
            warn!(error = %e, "Failed to clear heartbeat");
        }
        guard.release()?;

        if let Some(e) = fatal {
            return Err(e);
        }
        info!(completed = summary.completed, failed = summary.failed, "Worker stopped");
        Ok(summary)
    }

    fn spawn_heartbeat(&self, pid: u32, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let heartbeats = self.heartbeats.clone();
        let role = self.role.clone();
        let period = self.heartbeat_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // the first tick fires immediately and the worker has just beaten
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match heartbeats.beat(&role, pid).await {
                            Ok(()) => debug!(role = %role, pid, "Heartbeat"),
                            Err(e) => warn!(role = %role, error = %e, "Heartbeat write failed"),
                        }
                    }
                    _ = wait_for(&mut shutdown) => break,
                }
            }
        })
    }
}
