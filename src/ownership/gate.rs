use moka::sync::Cache;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

use super::rules::{escapes_root, normalize_path, OwnershipError, OwnershipRule, RuleSet};

const CACHE_CAPACITY: u64 = 10_000;

/// Outcome of a write check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum WriteDecision {
    /// The caller owns the path (or the path is unowned)
    Allowed,
    /// The write must be routed to `owner` as a task
    Delegate { owner: String },
    /// The path resolves outside the repository root; nobody may write it
    Refused { reason: String },
}

impl WriteDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, WriteDecision::Allowed)
    }
}

/// Resolves resource paths to their owning role.
///
/// Only writes go through the gate; reads are unrestricted. Lookups are cached
/// per normalised path until the rule set is replaced.
pub struct OwnershipGate {
    rules: RwLock<Arc<RuleSet>>,
    default_owner: Option<String>,
    cache: Cache<String, Option<String>>,
}

impl OwnershipGate {
    pub fn new(rules: RuleSet, default_owner: Option<String>) -> Self {
        Self {
            rules: RwLock::new(Arc::new(rules)),
            default_owner,
            cache: Cache::new(CACHE_CAPACITY),
        }
    }

    /// Validate `rules` and build a gate from them
    pub fn from_rules(
        rules: Vec<OwnershipRule>,
        default_owner: Option<String>,
    ) -> Result<Self, OwnershipError> {
        Ok(Self::new(RuleSet::load(rules)?, default_owner))
    }

    /// Decide whether `role` may write `path` directly
    pub fn check_write(&self, role: &str, path: &str) -> WriteDecision {
        let key = normalize_path(path);
        if escapes_root(&key) {
            warn!(role = %role, path = %path, "Write outside the repository root refused");
            return WriteDecision::Refused {
                reason: format!("'{path}' resolves outside the repository root"),
            };
        }
        match self.owner_for(key) {
            Some(owner) if owner != role => {
                debug!(role = %role, path = %path, owner = %owner, "Write requires delegation");
                WriteDecision::Delegate { owner }
            }
            _ => WriteDecision::Allowed,
        }
    }

    /// Owning role for `path`, if any. Paths outside the root have no owner.
    pub fn owner_of(&self, path: &str) -> Option<String> {
        let key = normalize_path(path);
        if escapes_root(&key) {
            return None;
        }
        self.owner_for(key)
    }

    fn owner_for(&self, key: String) -> Option<String> {
        // Held across resolve + insert so a concurrent reload cannot interleave
        let rules = self.rules.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(owner) = self.cache.get(&key) {
            return owner;
        }
        let owner = rules
            .resolve(&key)
            .map(|rule| rule.owner.clone())
            .or_else(|| self.default_owner.clone());
        self.cache.insert(key, owner.clone());
        owner
    }

    /// Replace the rule set. The new rules are validated first; on error the
    /// current set stays in force.
    pub fn reload(&self, rules: Vec<OwnershipRule>) -> Result<(), OwnershipError> {
        let next = Arc::new(RuleSet::load(rules)?);
        let mut current = self.rules.write().unwrap_or_else(PoisonError::into_inner);
        let count = next.len();
        *current = next;
        self.cache.invalidate_all();
        info!(rules = count, "Ownership rules reloaded");
        Ok(())
    }

    /// Snapshot of the active rules, longest pattern first
    pub fn rules(&self) -> Arc<RuleSet> {
        Arc::clone(&self.rules.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn default_owner(&self) -> Option<&str> {
        self.default_owner.as_deref()
    }
}
