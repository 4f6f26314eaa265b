//! Process supervision.
//!
//! The supervisor keeps exactly one worker process alive per configured role. Each
//! pass inspects every role: dead children and silent heartbeats count as crashes,
//! crashed roles are restarted with exponential backoff, and a role that exhausts
//! its restart budget is parked in `failed` and reported to the notifier.

pub mod backoff;
pub mod heartbeat;
pub mod lifecycle;
pub mod sinks;

pub use backoff::RestartPolicy;
pub use heartbeat::{Heartbeat, HeartbeatStore};
pub use lifecycle::{RoleEvent, RoleLifecycle, RoleMachine, RolePhase};
pub use sinks::{AlertLog, JsonStatusDir, Notifier, RoleFailureAlert, RoleStatus, StatusSink};

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tracing::{debug, error, info, warn, Instrument};

use crate::config::{RoleConfig, SupervisorConfig, SwitchboardConfig};
use crate::process::{group_alive, own_group, process_alive, send_signal, signal_group, Signal};
use crate::queue::{QueueError, RetryConfig, TaskQueue};
use crate::registry::{RegistryError, SingletonRegistry};
use crate::telemetry::{create_coordination_span, generate_correlation_id};

/// Registry entry held by the running supervisor itself
pub const SUPERVISOR_ROLE: &str = "supervisor";

const STOP_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Role '{role}' failed after {attempts} restart attempts: {last_error}")]
    RoleFailed {
        role: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Failed to spawn role '{role}': {source}")]
    Spawn {
        role: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to signal pid {pid}: {source}")]
    Signal {
        pid: u32,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("Supervisor I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Outcome of the start-up reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Roles whose registration pointed at a dead process
    pub pruned: Vec<String>,
    /// Running tasks returned to the queue
    pub requeued: u64,
}

/// Outcome of one supervision pass
#[derive(Debug, Default)]
pub struct TickReport {
    /// Roles scheduled for a restart during this pass
    pub restarting: Vec<String>,
    /// Roles that exhausted their restart budget during this pass
    pub failed: Vec<SupervisorError>,
}

/// Everything a managed role needs from its supervisor
struct Supervision {
    config: SupervisorConfig,
    policy: RestartPolicy,
    registry: SingletonRegistry,
    queue: TaskQueue,
    heartbeats: HeartbeatStore,
    status: Arc<dyn StatusSink>,
    notifier: Arc<dyn Notifier>,
    worker_program: Option<PathBuf>,
    config_path: Option<PathBuf>,
    hostname: String,
}

impl Supervision {
    fn command_for(&self, role: &RoleConfig) -> io::Result<Command> {
        let mut command = match &role.command {
            Some(program) => {
                let mut command = Command::new(program);
                command.args(&role.args);
                command
            }
            None => {
                let program = match &self.worker_program {
                    Some(program) => program.clone(),
                    None => std::env::current_exe()?,
                };
                let mut command = Command::new(program);
                if let Some(path) = &self.config_path {
                    command.arg("--config").arg(path);
                }
                command.arg("worker").arg("--role").arg(&role.name);
                command.args(&role.args);
                command
            }
        };

        command
            .envs(&role.env)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            // workers outlive a crashed supervisor and are adopted by the next one
            .kill_on_drop(false);
        // own process group, so a kill also reaches the worker's handler processes
        #[cfg(unix)]
        command.process_group(0);
        Ok(command)
    }

    /// Append a supervision metric; a failed write is logged, never fatal
    async fn record(&self, role: &str, metric: &str, value: f64) {
        if let Err(e) = self.queue.record_metric(role, metric, value).await {
            warn!(role = %role, metric = %metric, error = %e, "Failed to record metric");
        }
    }

    fn heartbeat_timeout(&self) -> Option<Duration> {
        let timeout = self.config.heartbeat_timeout();
        (!timeout.is_zero()).then_some(timeout)
    }
}

struct ManagedRole {
    config: RoleConfig,
    machine: RoleMachine,
    child: Option<Child>,
    pid: Option<u32>,
    /// Process group led by the worker, when it has one of its own
    group: Option<u32>,
    restarts: u32,
    started_at: Option<DateTime<Utc>>,
    started: Option<Instant>,
    /// Heartbeat silence is measured from here until the first beat
    watched_since: Option<DateTime<Utc>>,
    retry_at: Option<Instant>,
    last_heartbeat: Option<DateTime<Utc>>,
    last_error: Option<String>,
    /// Requeue that has not reached the database yet; blocks relaunch
    pending_requeue: Option<String>,
}

impl ManagedRole {
    fn new(config: RoleConfig) -> Self {
        let machine = RoleLifecycle::machine(config.name.clone());
        Self {
            config,
            machine,
            child: None,
            pid: None,
            group: None,
            restarts: 0,
            started_at: None,
            started: None,
            watched_since: None,
            retry_at: None,
            last_heartbeat: None,
            last_error: None,
            pending_requeue: None,
        }
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    fn phase(&self) -> RolePhase {
        lifecycle::phase(&self.machine)
    }

    fn status(&self, hostname: &str) -> RoleStatus {
        RoleStatus {
            role: self.config.name.clone(),
            phase: self.phase(),
            pid: self.pid,
            restarts: self.restarts,
            started_at: self.started_at,
            last_heartbeat: self.last_heartbeat,
            last_error: self.last_error.clone(),
            hostname: hostname.to_string(),
            updated_at: Utc::now(),
        }
    }

    fn start(&mut self) {
        self.retry_at = None;
        self.machine.handle(&RoleEvent::Start);
    }

    /// One supervision step; restarts and permanent failures are recorded in `report`
    async fn supervise(
        &mut self,
        ctx: &Supervision,
        report: &mut TickReport,
    ) -> Result<(), SupervisorError> {
        if self.pending_requeue.is_some() {
            self.flush_requeue(ctx).await;
        }

        match self.phase() {
            RolePhase::Starting => {
                let due = self.retry_at.map_or(true, |at| Instant::now() >= at);
                if due && self.pending_requeue.is_none() {
                    self.launch(ctx).await?;
                }
            }
            RolePhase::Running => self.observe(ctx).await?,
            RolePhase::Stopped | RolePhase::Stopping | RolePhase::Crashed | RolePhase::Failed => {}
        }

        // a launch or observation may have just crashed the role
        if self.phase() == RolePhase::Crashed {
            match self.recover(ctx).await? {
                Some(failure) => report.failed.push(failure),
                None => report.restarting.push(self.config.name.clone()),
            }
        }
        Ok(())
    }

    async fn launch(&mut self, ctx: &Supervision) -> Result<(), SupervisorError> {
        if let Some(existing) = ctx.registry.live(self.name())? {
            info!(
                role = %self.name(),
                pid = existing.pid,
                since = %existing.started_at,
                "Adopting already running worker"
            );
            self.child = None;
            self.pid = Some(existing.pid);
            self.group = own_group(existing.pid);
            self.started_at = Some(existing.started_at);
            self.started = Some(Instant::now());
            self.watched_since = Some(Utc::now());
            self.last_heartbeat = None;
            self.machine.handle(&RoleEvent::Spawned { pid: existing.pid });
            return Ok(());
        }

        let spawned = ctx
            .command_for(&self.config)
            .and_then(|mut command| command.spawn());
        match spawned {
            Ok(child) => {
                let pid = child.id().unwrap_or_default();
                let now = Utc::now();
                self.child = Some(child);
                self.pid = Some(pid);
                self.group = cfg!(unix).then_some(pid).filter(|pid| *pid > 1);
                self.started_at = Some(now);
                self.started = Some(Instant::now());
                self.watched_since = Some(now);
                self.last_heartbeat = None;
                self.machine.handle(&RoleEvent::Spawned { pid });
                ctx.record(self.name(), "spawns", 1.0).await;
            }
            Err(source) => {
                let error = SupervisorError::Spawn {
                    role: self.config.name.clone(),
                    source,
                }
                .to_string();
                self.last_error = Some(error.clone());
                self.machine.handle(&RoleEvent::SpawnFailed { error });
            }
        }
        Ok(())
    }

    async fn observe(&mut self, ctx: &Supervision) -> Result<(), SupervisorError> {
        let pid = self.pid.unwrap_or_default();

        let exited = match self.child.as_mut() {
            Some(child) => child.try_wait()?.map(|status| status.code()),
            None => (!process_alive(pid)).then_some(None),
        };
        if let Some(code) = exited {
            self.child = None;
            let reason = match code {
                Some(code) => format!("process {pid} exited with status {code}"),
                None => format!("process {pid} terminated"),
            };
            return self.crash(ctx, RoleEvent::Exited { code }, reason).await;
        }

        if let Some(beat) = ctx
            .heartbeats
            .last_beat(self.name())
            .await?
            .filter(|beat| beat.pid == pid)
        {
            self.last_heartbeat = Some(beat.beat_at);
        }

        if let Some(timeout) = ctx.heartbeat_timeout() {
            let baseline = self.last_heartbeat.or(self.watched_since).unwrap_or_else(Utc::now);
            let silent = (Utc::now() - baseline).to_std().unwrap_or_default();
            if silent > timeout {
                let reason = format!("no heartbeat from pid {pid} for {}ms", silent.as_millis());
                return self.crash(ctx, RoleEvent::HeartbeatMissed, reason).await;
            }
        }

        if self.restarts > 0
            && self
                .started
                .is_some_and(|at| at.elapsed() >= ctx.policy.stable_after)
        {
            info!(role = %self.name(), restarts = self.restarts, "Role stable; resetting restart counter");
            self.restarts = 0;
        }
        Ok(())
    }

    async fn crash(
        &mut self,
        ctx: &Supervision,
        event: RoleEvent,
        reason: String,
    ) -> Result<(), SupervisorError> {
        warn!(role = %self.name(), pid = ?self.pid, reason = %reason, "Role crashed");
        self.kill().await;
        self.pid = None;
        self.last_error = Some(reason.clone());
        self.machine.handle(&event);

        self.pending_requeue = Some(reason);
        self.flush_requeue(ctx).await;
        ctx.record(self.name(), "crashes", 1.0).await;
        Ok(())
    }

    /// Return the dead worker's running tasks to the queue; kept pending on failure
    /// and retried on the next pass
    async fn flush_requeue(&mut self, ctx: &Supervision) {
        let Some(reason) = self.pending_requeue.as_deref() else {
            return;
        };
        match ctx.queue.requeue_running(&self.config.name, reason).await {
            Ok(_) => self.pending_requeue = None,
            Err(e) => warn!(
                role = %self.name(),
                error = %e,
                "Requeue of running tasks failed; retrying next pass"
            ),
        }
    }

    async fn recover(&mut self, ctx: &Supervision) -> Result<Option<SupervisorError>, SupervisorError> {
        if ctx.policy.exhausted(self.restarts) {
            self.machine.handle(&RoleEvent::GiveUp);
            let last_error = self
                .last_error
                .clone()
                .unwrap_or_else(|| "unknown error".to_string());

            ctx.notifier
                .role_failed(&RoleFailureAlert {
                    role: self.config.name.clone(),
                    attempts: self.restarts,
                    last_error: last_error.clone(),
                    hostname: ctx.hostname.clone(),
                    at: Utc::now(),
                })
                .await;
            ctx.record(self.name(), "failures", 1.0).await;

            return Ok(Some(SupervisorError::RoleFailed {
                role: self.config.name.clone(),
                attempts: self.restarts,
                last_error,
            }));
        }

        let delay = ctx.policy.delay(self.restarts);
        self.restarts += 1;
        self.retry_at = Some(Instant::now() + delay);
        self.machine.handle(&RoleEvent::Retry);

        info!(
            role = %self.name(),
            attempt = self.restarts,
            delay_ms = delay.as_millis() as u64,
            "Scheduling restart"
        );
        ctx.record(self.name(), "restarts", self.restarts as f64).await;
        Ok(None)
    }

    /// Ask the process to finish its current task and exit
    fn request_stop(&mut self) {
        match self.phase() {
            RolePhase::Running => {
                if let Some(pid) = self.pid {
                    debug!(role = %self.name(), pid, "Sending SIGTERM");
                    if let Err(source) = send_signal(pid, Signal::Terminate) {
                        let error = SupervisorError::Signal { pid, source };
                        warn!(role = %self.name(), error = %error, "Failed to signal worker");
                    }
                }
                self.machine.handle(&RoleEvent::Stop);
            }
            RolePhase::Starting | RolePhase::Crashed => self.machine.handle(&RoleEvent::Stop),
            RolePhase::Stopped | RolePhase::Stopping | RolePhase::Failed => {}
        }
    }

    /// Whether a stopping process has exited
    fn reap(&mut self) -> Result<bool, SupervisorError> {
        let exited = match (self.child.as_mut(), self.pid) {
            (Some(child), _) => child.try_wait()?.is_some(),
            (None, Some(pid)) => !process_alive(pid),
            (None, None) => true,
        };
        if exited {
            self.child = None;
            self.pid = None;
            self.kill_group();
            self.machine.handle(&RoleEvent::Stopped);
        }
        Ok(exited)
    }

    async fn force_stop(&mut self, ctx: &Supervision) -> Result<(), SupervisorError> {
        warn!(role = %self.name(), pid = ?self.pid, "Grace period expired; killing worker");
        self.kill().await;
        self.pid = None;
        self.machine.handle(&RoleEvent::Stopped);
        // no later pass will retry this one
        let role = self.config.name.as_str();
        RetryConfig::default()
            .run("requeue_running", || {
                ctx.queue.requeue_running(role, "worker killed at shutdown")
            })
            .await?;
        Ok(())
    }

    async fn kill(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill().await {
                debug!(role = %self.name(), error = %e, "Child already gone");
            }
        } else if let Some(pid) = self.pid.filter(|pid| process_alive(*pid)) {
            if let Err(source) = send_signal(pid, Signal::Kill) {
                let error = SupervisorError::Signal { pid, source };
                warn!(role = %self.name(), error = %error, "Failed to kill worker");
            }
        }
        self.kill_group();
    }

    /// SIGKILL whatever is left of the worker's process group, such as handler
    /// processes that outlived the worker
    fn kill_group(&mut self) {
        let Some(group) = self.group.take() else {
            return;
        };
        if group_alive(group) {
            debug!(role = %self.name(), pgid = group, "Killing worker process group");
            if let Err(source) = signal_group(group, Signal::Kill) {
                let error = SupervisorError::Signal { pid: group, source };
                warn!(role = %self.name(), error = %error, "Failed to kill worker process group");
            }
        }
    }
}

/// Keeps one worker process alive per configured role
pub struct ProcessSupervisor {
    ctx: Supervision,
    roles: BTreeMap<String, ManagedRole>,
}

impl ProcessSupervisor {
    pub fn new(config: &SwitchboardConfig, registry: SingletonRegistry, queue: TaskQueue) -> Self {
        let heartbeats = HeartbeatStore::from_pool(queue.pool().clone());
        let roles = config
            .roles
            .iter()
            .map(|role| (role.name.clone(), ManagedRole::new(role.clone())))
            .collect();

        Self {
            ctx: Supervision {
                config: config.supervisor.clone(),
                policy: RestartPolicy::from_config(&config.supervisor),
                registry,
                queue,
                heartbeats,
                status: Arc::new(JsonStatusDir::new(config.status_dir())),
                notifier: Arc::new(AlertLog::new(config.alerts_file())),
                worker_program: None,
                config_path: None,
                hostname: sinks::local_hostname(),
            },
            roles,
        }
    }

    pub fn with_status_sink(mut self, sink: Arc<dyn StatusSink>) -> Self {
        self.ctx.status = sink;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.ctx.notifier = notifier;
        self
    }

    pub fn with_policy(mut self, policy: RestartPolicy) -> Self {
        self.ctx.policy = policy;
        self
    }

    /// Program spawned for roles without an explicit `command` (defaults to the current executable)
    pub fn with_worker_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.ctx.worker_program = Some(program.into());
        self
    }

    /// Configuration file handed to default workers via `--config`
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ctx.config_path = Some(path.into());
        self
    }

    pub fn phase(&self, role: &str) -> Option<RolePhase> {
        self.roles.get(role).map(ManagedRole::phase)
    }

    pub fn statuses(&self) -> Vec<RoleStatus> {
        self.roles
            .values()
            .map(|role| role.status(&self.ctx.hostname))
            .collect()
    }

    /// Bring persisted state in line with reality before any worker is spawned
    pub async fn reconcile(&self) -> Result<ReconcileReport, SupervisorError> {
        let pruned: Vec<String> = self
            .ctx
            .registry
            .prune_dead()?
            .into_iter()
            .map(|registration| registration.role)
            .collect();

        let mut requeued = 0;
        for role in self.roles.keys() {
            if self.ctx.registry.live(role)?.is_none() {
                requeued += self
                    .ctx
                    .queue
                    .requeue_running(role, "no live worker at supervisor start")
                    .await?;
            }
        }
        if let Some(timeout) = self.ctx.heartbeat_timeout() {
            requeued += self.ctx.queue.reclaim_stale(timeout).await?;
        }

        info!(pruned = ?pruned, requeued, "Reconciled coordination state");
        Ok(ReconcileReport { pruned, requeued })
    }

    /// Reconcile, then launch every configured role
    pub async fn start(&mut self) -> Result<TickReport, SupervisorError> {
        self.reconcile().await?;
        for role in self.roles.values_mut() {
            if role.phase() == RolePhase::Stopped {
                role.start();
            }
        }
        self.tick().await
    }

    /// One supervision pass over every role
    pub async fn tick(&mut self) -> Result<TickReport, SupervisorError> {
        let mut report = TickReport::default();
        for role in self.roles.values_mut() {
            let result = role.supervise(&self.ctx, &mut report).await;
            publish(&self.ctx, role);
            result?;
        }
        Ok(report)
    }

    /// Supervise until `shutdown` flips to `true`, then stop every role
    pub async fn run(mut self, shutdown: watch::Receiver<bool>) -> Result<(), SupervisorError> {
        let _guard = self.ctx.registry.register(SUPERVISOR_ROLE)?;
        let correlation_id = generate_correlation_id();
        let span = create_coordination_span(
            "supervise",
            None,
            Some(std::process::id()),
            Some(correlation_id.as_str()),
        );
        self.supervise_until(shutdown).instrument(span).await
    }

    async fn supervise_until(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), SupervisorError> {
        info!(roles = self.roles.len(), "Supervisor started");
        let report = self.start().await?;
        log_failures(&report);

        let mut interval = tokio::time::interval(self.ctx.config.poll_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.tick().await {
                        Ok(report) => log_failures(&report),
                        Err(e) => warn!(error = %e, "Supervision pass failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.shutdown().await
    }

    /// SIGTERM every managed process, wait out the grace period, then SIGKILL stragglers
    pub async fn shutdown(&mut self) -> Result<(), SupervisorError> {
        info!(grace_secs = self.ctx.config.shutdown_grace_secs, "Stopping all roles");
        for role in self.roles.values_mut() {
            role.request_stop();
        }

        let deadline = Instant::now() + self.ctx.config.shutdown_grace();
        loop {
            let mut pending = 0;
            for role in self.roles.values_mut() {
                if role.phase() == RolePhase::Stopping && !role.reap()? {
                    pending += 1;
                }
            }
            if pending == 0 || Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(STOP_POLL).await;
        }

        for role in self.roles.values_mut() {
            if role.phase() == RolePhase::Stopping {
                role.force_stop(&self.ctx).await?;
            }
            publish(&self.ctx, role);
        }
        info!("Supervisor stopped");
        Ok(())
    }
}

fn publish(ctx: &Supervision, role: &ManagedRole) {
    if let Err(e) = ctx.status.publish(&role.status(&ctx.hostname)) {
        warn!(role = %role.name(), error = %e, "Failed to publish role status");
    }
}

fn log_failures(report: &TickReport) {
    for failure in &report.failed {
        error!(error = %failure, "Role will not be restarted this session");
    }
}
