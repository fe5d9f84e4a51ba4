// src/utils/config.rs
//! Layered configuration for the orchestrator daemon
//!
//! Sources, later ones overriding earlier ones:
//! 1. Built-in defaults
//! 2. `orchestrator.{toml,yaml,json}` in the working directory, or the file
//!    named by `ORCHESTRATOR_CONFIG`
//! 3. Environment variables such as `ORCHESTRATOR__RUNTIME__CHECK_INTERVAL_MS`

use crate::domain::agent::AgentConfig;
use crate::runtime::manager::RuntimeSettings;
use crate::utils::errors::{OrchestratorError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_CONFIG_NAME: &str = "orchestrator";
const CONFIG_PATH_VAR: &str = "ORCHESTRATOR_CONFIG";
const ENV_PREFIX: &str = "ORCHESTRATOR";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub runtime: RuntimeSection,
    pub worker: WorkerSection,
    pub storage: StorageSection,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,

    /// Number of recent events kept by the event journal
    pub journal_capacity: usize,

    /// Agents started when the daemon boots
    pub agents: Vec<AgentConfig>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            runtime: RuntimeSection::default(),
            worker: WorkerSection::default(),
            storage: StorageSection::default(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
            journal_capacity: 1024,
            agents: vec![],
        }
    }
}

/// Supervision loop tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSection {
    /// Interval between dispatch / heartbeat passes
    pub check_interval_ms: u64,

    /// Silence after which a working agent is marked as errored
    pub heartbeat_timeout_ms: u64,

    /// Root handed to the workspace provider
    pub workspace_root: PathBuf,
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            check_interval_ms: 5_000,
            heartbeat_timeout_ms: 60_000,
            workspace_root: PathBuf::from("./workspace"),
        }
    }
}

/// External worker program. When `command` is unset the daemon runs the
/// in-process reference worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSection {
    pub command: Option<String>,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,

    /// Time between SIGTERM and SIGKILL on forced termination
    pub terminate_grace_ms: u64,
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            command: None,
            args: vec![],
            env: HashMap::new(),
            terminate_grace_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub backend: StorageBackend,
    pub sqlite_path: PathBuf,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            sqlite_path: PathBuf::from("orchestrator.db"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Fallback filter when `RUST_LOG` is unset
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub listen: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: "127.0.0.1:9000".to_string(),
        }
    }
}

impl OrchestratorConfig {
    /// Load from the default file location and the environment
    pub fn load() -> Result<Self> {
        let name = std::env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_NAME.to_string());
        Self::load_from(&name)
    }

    /// Load from an explicit file (missing files are skipped) and the environment
    pub fn load_from(name: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(name).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let cfg: Self = settings.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.runtime.check_interval_ms == 0 {
            return Err(OrchestratorError::Config(
                "runtime.check_interval_ms must be greater than zero".into(),
            ));
        }
        if self.runtime.heartbeat_timeout_ms == 0 {
            return Err(OrchestratorError::Config(
                "runtime.heartbeat_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.journal_capacity == 0 {
            return Err(OrchestratorError::Config(
                "journal_capacity must be greater than zero".into(),
            ));
        }
        if let Some(command) = &self.worker.command {
            if command.trim().is_empty() {
                return Err(OrchestratorError::Config("worker.command is empty".into()));
            }
        }

        let mut seen = std::collections::HashSet::new();
        for agent in &self.agents {
            if !seen.insert(agent.id.as_str()) {
                return Err(OrchestratorError::Config(format!(
                    "agent {} is configured more than once",
                    agent.id
                )));
            }
        }

        Ok(())
    }

    /// Manager tuning derived from the `runtime` section
    pub fn runtime_settings(&self) -> RuntimeSettings {
        RuntimeSettings {
            check_interval: Duration::from_millis(self.runtime.check_interval_ms),
            heartbeat_timeout: Duration::from_millis(self.runtime.heartbeat_timeout_ms),
        }
    }
}
