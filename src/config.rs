use anyhow::{bail, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ownership::OwnershipRule;

/// Main configuration structure for Switchboard
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SwitchboardConfig {
    /// Directory holding the registry, status files and (by default) the database
    pub data_dir: String,
    /// Database settings
    pub database: DatabaseConfig,
    /// Observability settings
    pub observability: ObservabilityConfig,
    /// Process supervision settings
    pub supervisor: SupervisorConfig,
    /// Worker roles managed by the supervisor
    pub roles: Vec<RoleConfig>,
    /// Resource ownership rules
    pub ownership: OwnershipConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file path or sqlite:// URL
    pub url: String,
    /// Maximum connections in pool
    pub max_connections: u32,
    /// How long a writer waits for the SQLite write lock
    pub busy_timeout_ms: u64,
    /// Retention window used by `cleanup` when no explicit value is given
    pub retention_days: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (overridden by RUST_LOG)
    pub log_level: String,
    /// Emit JSON structured logs instead of human-readable lines
    pub json_logs: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// How often the supervisor inspects every role
    pub poll_interval_secs: u64,
    /// How often workers write a heartbeat
    pub heartbeat_interval_secs: u64,
    /// A running role with no heartbeat for this long is treated as crashed (0 disables the check)
    pub heartbeat_timeout_secs: u64,
    /// Restart attempts before a role is marked failed
    pub max_restarts: u32,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
    pub backoff_factor: f64,
    /// Spread restart delays by up to +/-20%
    pub backoff_jitter: bool,
    /// Uptime after which the restart counter resets
    pub stable_after_secs: u64,
    /// Time between SIGTERM and SIGKILL on shutdown
    pub shutdown_grace_secs: u64,
    /// Per-role JSON status files (relative paths resolve under data_dir)
    pub status_dir: String,
    /// JSON-lines file receiving role failure alerts
    pub alerts_file: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RoleConfig {
    /// Role name, unique across the configuration
    pub name: String,
    /// Program to spawn for this role (defaults to `switchboard worker --role <name>`)
    pub command: Option<String>,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    /// Queue poll interval for the worker; shorter for high-priority roles
    pub poll_interval_ms: Option<u64>,
    /// Program + args run by the default worker for every claimed task
    pub handler: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct OwnershipConfig {
    /// Owner for paths that match no rule; unset means unmatched paths are unrestricted
    pub default_owner: Option<String>,
    pub rules: Vec<OwnershipRule>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: ".switchboard/switchboard.db".to_string(),
            max_connections: 5,
            busy_timeout_ms: 5_000,
            retention_days: 30,
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 2,
            heartbeat_interval_secs: 5,
            heartbeat_timeout_secs: 30,
            max_restarts: 5,
            backoff_initial_ms: 1_000,
            backoff_max_ms: 60_000,
            backoff_factor: 2.0,
            backoff_jitter: true,
            stable_after_secs: 300,
            shutdown_grace_secs: 30,
            status_dir: "status".to_string(),
            alerts_file: "alerts.jsonl".to_string(),
        }
    }
}

impl Default for SwitchboardConfig {
    fn default() -> Self {
        Self {
            data_dir: ".switchboard".to_string(),
            database: DatabaseConfig::default(),
            observability: ObservabilityConfig::default(),
            supervisor: SupervisorConfig::default(),
            roles: Vec::new(),
            ownership: OwnershipConfig::default(),
        }
    }
}

impl SupervisorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl RoleConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.unwrap_or(2_000).max(10))
    }
}

impl SwitchboardConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration files (switchboard.toml, .switchboard-rc)
    /// 3. Environment variables (prefixed with SWITCHBOARD_)
    pub fn load() -> Result<Self> {
        let mut builder = Config::builder();

        if Path::new("switchboard.toml").exists() {
            builder = builder.add_source(File::with_name("switchboard"));
        }

        if Path::new(".switchboard-rc").exists() {
            builder = builder.add_source(File::new(".switchboard-rc", config::FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix("SWITCHBOARD")
                .separator("__")
                .try_parsing(true),
        );

        let config: SwitchboardConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load a specific configuration file (plus environment overrides)
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config: SwitchboardConfig = Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(
                Environment::with_prefix("SWITCHBOARD")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Fail fast on configuration errors that would otherwise surface mid-session
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for role in &self.roles {
            if role.name.trim().is_empty() {
                bail!("Role names must not be empty");
            }
            if !seen.insert(role.name.as_str()) {
                bail!("Role '{}' is configured more than once", role.name);
            }
        }

        crate::ownership::RuleSet::load(self.ownership.rules.clone())?;

        if self.supervisor.backoff_factor < 1.0 {
            bail!(
                "supervisor.backoff_factor must be >= 1.0 (got {})",
                self.supervisor.backoff_factor
            );
        }
        Ok(())
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_content = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_content)?;
        Ok(())
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }

    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.data_dir)
    }

    pub fn status_dir(&self) -> PathBuf {
        self.resolve(&self.supervisor.status_dir)
    }

    pub fn alerts_file(&self) -> PathBuf {
        self.resolve(&self.supervisor.alerts_file)
    }

    pub fn role(&self, name: &str) -> Option<&RoleConfig> {
        self.roles.iter().find(|r| r.name == name)
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.data_dir().join(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = SwitchboardConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.status_dir(), PathBuf::from(".switchboard/status"));
    }

    #[test]
    fn test_load_from_toml_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("switchboard.toml");
        std::fs::write(
            &path,
            r#"
data_dir = "/tmp/sb"

[supervisor]
max_restarts = 2

[[roles]]
name = "builder"
poll_interval_ms = 250
handler = ["sh", "-c", "cat > /dev/null"]

[[roles]]
name = "reviewer"

[ownership]
default_owner = "builder"

[[ownership.rules]]
pattern = "docs/**"
owner = "reviewer"
"#,
        )
        .unwrap();

        let config = SwitchboardConfig::load_from(&path).unwrap();
        assert_eq!(config.supervisor.max_restarts, 2);
        assert_eq!(config.supervisor.heartbeat_timeout_secs, 30);
        assert_eq!(config.roles.len(), 2);
        assert_eq!(
            config.role("builder").unwrap().poll_interval(),
            Duration::from_millis(250)
        );
        assert_eq!(config.ownership.rules[0].owner, "reviewer");
        assert_eq!(config.alerts_file(), PathBuf::from("/tmp/sb/alerts.jsonl"));
    }

    #[test]
    fn test_saved_config_loads_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("switchboard.toml");
        let mut config = SwitchboardConfig::default();
        config.roles = vec![RoleConfig::new("builder")];
        config.ownership.rules = vec![OwnershipRule::new("src/**", "builder")];
        config.save_to_file(&path).unwrap();

        let loaded = SwitchboardConfig::load_from(&path).unwrap();
        assert_eq!(loaded.roles[0].name, "builder");
        assert_eq!(loaded.ownership.rules, config.ownership.rules);
    }

    #[test]
    fn test_duplicate_roles_rejected() {
        let mut config = SwitchboardConfig::default();
        config.roles = vec![RoleConfig::new("builder"), RoleConfig::new("builder")];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_conflicting_ownership_rejected() {
        let mut config = SwitchboardConfig::default();
        config.ownership.rules = vec![
            OwnershipRule::new("src/**", "builder"),
            OwnershipRule::new("src/**", "reviewer"),
        ];
        assert!(config.validate().is_err());
    }
}
