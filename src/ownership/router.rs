use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use super::gate::{OwnershipGate, WriteDecision};
use super::rules::normalize_path;
use crate::priority::Priority;
use crate::queue::{DelegationTrace, NewTask, QueueError, TaskQueue};

/// Task type used for writes rerouted to their owner
pub const DELEGATED_WRITE: &str = "delegated_write";

/// What the caller should do with a write it wanted to perform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "route", rename_all = "snake_case")]
pub enum WriteRoute {
    /// Perform the write directly
    Proceed,
    /// The write was queued for the owning role; do not touch the path
    Delegated { owner: String, task_id: String },
    /// Nobody may write the path
    Refused { reason: String },
}

/// Turns ownership decisions into queued work so that a misdirected write is
/// rerouted instead of failing.
#[derive(Clone)]
pub struct WriteRouter {
    gate: Arc<OwnershipGate>,
    queue: TaskQueue,
    priority: Priority,
}

impl WriteRouter {
    pub fn new(gate: Arc<OwnershipGate>, queue: TaskQueue) -> Self {
        Self {
            gate,
            queue,
            priority: Priority::DEFAULT,
        }
    }

    /// Priority given to delegated-write tasks
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn gate(&self) -> &OwnershipGate {
        &self.gate
    }

    /// Route a write of `path` requested by `role`.
    ///
    /// A delegated write becomes a `delegated_write` task for the owner, with the
    /// delegation trace stored in the same transaction.
    pub async fn route_write(
        &self,
        role: &str,
        path: &str,
        payload: serde_json::Value,
    ) -> Result<WriteRoute, QueueError> {
        let owner = match self.gate.check_write(role, path) {
            WriteDecision::Allowed => return Ok(WriteRoute::Proceed),
            WriteDecision::Delegate { owner } => owner,
            WriteDecision::Refused { reason } => return Ok(WriteRoute::Refused { reason }),
        };

        let path = normalize_path(path);
        let trace = DelegationTrace {
            role: role.to_string(),
            path: path.clone(),
            owner: owner.clone(),
            task_id: None,
            at: Utc::now(),
        };
        let task = NewTask::new(role, owner.as_str(), DELEGATED_WRITE)
            .with_priority(self.priority.value() as i64)
            .with_payload(json!({
                "path": path,
                "requested_by": role,
                "payload": payload,
            }));

        let queued = self.queue.send_delegated(task, &trace).await?;
        Ok(WriteRoute::Delegated {
            owner,
            task_id: queued.id,
        })
    }
}
