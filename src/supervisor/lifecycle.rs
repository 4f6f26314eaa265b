use serde::{Deserialize, Serialize};
use statig::prelude::*;
use std::fmt;

/// Inputs to a role's lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleEvent {
    Start,
    Spawned { pid: u32 },
    SpawnFailed { error: String },
    Exited { code: Option<i32> },
    HeartbeatMissed,
    Retry,
    GiveUp,
    Stop,
    Stopped,
}

/// Externally visible lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RolePhase {
    Stopped,
    Starting,
    Running,
    Crashed,
    Stopping,
    Failed,
}

impl fmt::Display for RolePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RolePhase::Stopped => "stopped",
            RolePhase::Starting => "starting",
            RolePhase::Running => "running",
            RolePhase::Crashed => "crashed",
            RolePhase::Stopping => "stopping",
            RolePhase::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Per-role process lifecycle:
/// `stopped → starting → running → {crashed → starting | stopping → stopped}`,
/// with `crashed → failed` once the restart budget is spent.
pub struct RoleLifecycle {
    role: String,
}

pub type RoleMachine = StateMachine<RoleLifecycle>;

impl RoleLifecycle {
    pub fn new(role: impl Into<String>) -> Self {
        Self { role: role.into() }
    }

    pub fn machine(role: impl Into<String>) -> RoleMachine {
        Self::new(role).state_machine()
    }
}

#[state_machine(initial = "State::stopped()")]
impl RoleLifecycle {
    #[state]
    fn stopped(&mut self, event: &RoleEvent) -> Outcome<State> {
        match event {
            RoleEvent::Start => {
                tracing::debug!(role = %self.role, "Role starting");
                Transition(State::starting())
            }
            _ => Handled,
        }
    }

    #[state]
    fn starting(&mut self, event: &RoleEvent) -> Outcome<State> {
        match event {
            RoleEvent::Spawned { pid } => {
                tracing::info!(role = %self.role, pid = %pid, "Role running");
                Transition(State::running())
            }
            RoleEvent::SpawnFailed { error } => {
                tracing::error!(role = %self.role, error = %error, "Role failed to spawn");
                Transition(State::crashed())
            }
            RoleEvent::Stop => Transition(State::stopped()),
            _ => Handled,
        }
    }

    #[state]
    fn running(&mut self, event: &RoleEvent) -> Outcome<State> {
        match event {
            RoleEvent::Exited { code } => {
                tracing::warn!(role = %self.role, exit_code = ?code, "Role process exited");
                Transition(State::crashed())
            }
            RoleEvent::HeartbeatMissed => {
                tracing::warn!(role = %self.role, "Role missed heartbeat deadline");
                Transition(State::crashed())
            }
            RoleEvent::Stop => Transition(State::stopping()),
            _ => Handled,
        }
    }

    #[state]
    fn crashed(&mut self, event: &RoleEvent) -> Outcome<State> {
        match event {
            RoleEvent::Retry => Transition(State::starting()),
            RoleEvent::GiveUp => {
                tracing::error!(role = %self.role, "Role restart budget exhausted");
                Transition(State::failed())
            }
            RoleEvent::Stop => Transition(State::stopped()),
            _ => Handled,
        }
    }

    #[state]
    fn stopping(&mut self, event: &RoleEvent) -> Outcome<State> {
        match event {
            RoleEvent::Stopped | RoleEvent::Exited { .. } => {
                tracing::info!(role = %self.role, "Role stopped");
                Transition(State::stopped())
            }
            _ => Handled,
        }
    }

    #[state]
    fn failed(&mut self, event: &RoleEvent) -> Outcome<State> {
        // terminal for the rest of the supervisor session
        let _ = event;
        Handled
    }
}

/// Phase of a lifecycle machine
pub fn phase(machine: &RoleMachine) -> RolePhase {
    match machine.state() {
        State::Stopped { .. } => RolePhase::Stopped,
        State::Starting { .. } => RolePhase::Starting,
        State::Running { .. } => RolePhase::Running,
        State::Crashed { .. } => RolePhase::Crashed,
        State::Stopping { .. } => RolePhase::Stopping,
        State::Failed { .. } => RolePhase::Failed,
    }
}
