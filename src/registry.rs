//! Singleton registry: at most one live process per worker role.
//!
//! Registrations live in `registry.json` inside the data directory. Every read and
//! write happens under an exclusive `fd-lock` on `registry.lock`, so concurrent
//! processes see a consistent view. A registration whose PID is gone is stale and
//! is reclaimed by the next `register` call for that role.

use chrono::{DateTime, Utc};
use fd_lock::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::process::process_alive;

const REGISTRY_FILE: &str = "registry.json";
const LOCK_FILE: &str = "registry.lock";

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Role '{role}' is already running (pid {pid}, since {since})")]
    AlreadyRunning {
        role: String,
        pid: u32,
        since: DateTime<Utc>,
    },

    #[error("Registry I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Registry file is corrupt: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// One live entry per role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerRegistration {
    pub role: String,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
}

impl WorkerRegistration {
    pub fn is_alive(&self) -> bool {
        process_alive(self.pid)
    }
}

type Entries = BTreeMap<String, WorkerRegistration>;

/// Handle to the registry directory. Cheap to clone; holds no lock between calls.
#[derive(Debug, Clone)]
pub struct SingletonRegistry {
    dir: PathBuf,
}

impl SingletonRegistry {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Claim `role` for the calling process
    pub fn register(&self, role: &str) -> Result<RoleGuard, RegistryError> {
        self.register_pid(role, std::process::id())
    }

    /// Claim `role` on behalf of `pid`
    pub fn register_pid(&self, role: &str, pid: u32) -> Result<RoleGuard, RegistryError> {
        let registration = self.locked(|entries| {
            if let Some(existing) = entries.get(role) {
                if existing.is_alive() {
                    return Err(RegistryError::AlreadyRunning {
                        role: role.to_string(),
                        pid: existing.pid,
                        since: existing.started_at,
                    });
                }
                warn!(
                    role = %role,
                    stale_pid = existing.pid,
                    since = %existing.started_at,
                    "Reclaiming stale registration"
                );
            }

            let registration = WorkerRegistration {
                role: role.to_string(),
                pid,
                started_at: Utc::now(),
            };
            entries.insert(role.to_string(), registration.clone());
            Ok((registration, true))
        })?;

        info!(role = %role, pid, "Role registered");
        Ok(RoleGuard {
            registry: self.clone(),
            registration,
            released: false,
        })
    }

    /// Current registration for `role`, live or not
    pub fn lookup(&self, role: &str) -> Result<Option<WorkerRegistration>, RegistryError> {
        self.locked(|entries| Ok((entries.get(role).cloned(), false)))
    }

    /// Registration for `role` only if its process is still running
    pub fn live(&self, role: &str) -> Result<Option<WorkerRegistration>, RegistryError> {
        Ok(self.lookup(role)?.filter(WorkerRegistration::is_alive))
    }

    pub fn list(&self) -> Result<Vec<WorkerRegistration>, RegistryError> {
        self.locked(|entries| Ok((entries.values().cloned().collect(), false)))
    }

    /// Drop every registration whose process has died; returns what was removed
    pub fn prune_dead(&self) -> Result<Vec<WorkerRegistration>, RegistryError> {
        let removed = self.locked(|entries| {
            let dead: Vec<WorkerRegistration> =
                entries.values().filter(|r| !r.is_alive()).cloned().collect();
            for registration in &dead {
                entries.remove(&registration.role);
            }
            let dirty = !dead.is_empty();
            Ok((dead, dirty))
        })?;

        for registration in &removed {
            info!(role = %registration.role, pid = registration.pid, "Pruned dead registration");
        }
        Ok(removed)
    }

    /// Remove `role` if it is still held by `pid`
    fn unregister(&self, role: &str, pid: u32) -> Result<bool, RegistryError> {
        self.locked(|entries| {
            let owned = entries.get(role).is_some_and(|existing| existing.pid == pid);
            if owned {
                entries.remove(role);
            }
            Ok((owned, owned))
        })
    }

    /// Run `f` against the registry contents while holding the file lock.
    /// `f` returns whether it modified the entries.
    fn locked<T>(
        &self,
        f: impl FnOnce(&mut Entries) -> Result<(T, bool), RegistryError>,
    ) -> Result<T, RegistryError> {
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(self.dir.join(LOCK_FILE))?;
        let mut lock = RwLock::new(lock_file);
        let _guard = lock.write()?;

        let mut entries = self.read_entries()?;
        let (value, dirty) = f(&mut entries)?;
        if dirty {
            self.write_entries(&entries)?;
        }
        Ok(value)
    }

    fn read_entries(&self) -> Result<Entries, RegistryError> {
        match fs::read_to_string(self.dir.join(REGISTRY_FILE)) {
            Ok(content) if content.trim().is_empty() => Ok(Entries::new()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Entries::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_entries(&self, entries: &Entries) -> Result<(), RegistryError> {
        let tmp = self.dir.join(format!("{REGISTRY_FILE}.tmp"));
        fs::write(&tmp, serde_json::to_vec_pretty(entries)?)?;
        fs::rename(&tmp, self.dir.join(REGISTRY_FILE))?;
        Ok(())
    }
}

/// Exclusive ownership of a role. Dropping the guard unregisters the role; a
/// crashed holder leaves a stale entry that the next registration reclaims.
#[derive(Debug)]
pub struct RoleGuard {
    registry: SingletonRegistry,
    registration: WorkerRegistration,
    released: bool,
}

impl RoleGuard {
    pub fn role(&self) -> &str {
        &self.registration.role
    }

    pub fn pid(&self) -> u32 {
        self.registration.pid
    }

    pub fn registration(&self) -> &WorkerRegistration {
        &self.registration
    }

    /// Unregister now. Calling it more than once is harmless.
    pub fn release(&mut self) -> Result<(), RegistryError> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        let removed = self
            .registry
            .unregister(&self.registration.role, self.registration.pid)?;
        debug!(role = %self.registration.role, removed, "Role released");
        Ok(())
    }
}

impl Drop for RoleGuard {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!(role = %self.registration.role, error = %e, "Failed to release role registration");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn dead_pid() -> u32 {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        pid
    }

    #[test]
    fn test_second_registration_fails_while_held() {
        let dir = TempDir::new().unwrap();
        let registry = SingletonRegistry::open(dir.path()).unwrap();

        let guard = registry.register("builder").unwrap();
        match registry.register("builder") {
            Err(RegistryError::AlreadyRunning { role, pid, since }) => {
                assert_eq!(role, "builder");
                assert_eq!(pid, std::process::id());
                assert_eq!(since, guard.registration().started_at);
            }
            other => panic!("expected AlreadyRunning, got {other:?}"),
        }

        // other roles are independent
        let _reviewer = registry.register("reviewer").unwrap();

        drop(guard);
        assert!(registry.register("builder").is_ok());
    }

    #[test]
    fn test_dead_registration_is_reclaimed() {
        let dir = TempDir::new().unwrap();
        let registry = SingletonRegistry::open(dir.path()).unwrap();

        let stale = registry.register_pid("builder", dead_pid()).unwrap();
        std::mem::forget(stale); // crashed holder never releases

        let guard = registry.register("builder").unwrap();
        assert_eq!(guard.pid(), std::process::id());
        assert_eq!(registry.lookup("builder").unwrap().unwrap().pid, std::process::id());
    }

    #[test]
    fn test_release_only_removes_own_entry() {
        let dir = TempDir::new().unwrap();
        let registry = SingletonRegistry::open(dir.path()).unwrap();

        let mut stale = registry.register_pid("builder", dead_pid()).unwrap();
        let fresh = registry.register("builder").unwrap();

        // the old holder releasing late must not evict the new one
        stale.release().unwrap();
        assert_eq!(registry.live("builder").unwrap().unwrap().pid, fresh.pid());
    }

    #[test]
    fn test_prune_dead() {
        let dir = TempDir::new().unwrap();
        let registry = SingletonRegistry::open(dir.path()).unwrap();

        std::mem::forget(registry.register_pid("ghost", dead_pid()).unwrap());
        let _alive = registry.register("builder").unwrap();

        let pruned = registry.prune_dead().unwrap();
        assert_eq!(pruned.len(), 1);
        assert_eq!(pruned[0].role, "ghost");
        assert_eq!(registry.list().unwrap().len(), 1);
        assert!(registry.live("ghost").unwrap().is_none());
    }

    #[test]
    fn test_concurrent_registration_has_one_winner() {
        let dir = TempDir::new().unwrap();
        let registry = SingletonRegistry::open(dir.path()).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || registry.register("builder").map(std::mem::forget).is_ok())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();

        assert_eq!(winners, 1);
    }
}
