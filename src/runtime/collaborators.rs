// src/runtime/collaborators.rs
//! External collaborators of the runtime manager
//!
//! Each seam is a trait with a reference implementation:
//!
//! - **AgentConfigProvider**: resolves an agent's configuration at dispatch
//! - **WorkspaceProvider**: project and worktree paths for a task
//! - **ToolExecutor**: answers `tool_call` requests from units
//! - **LogSink**: receives unit `log` messages

use crate::domain::agent::AgentConfig;
use crate::domain::task::Task;
use crate::runtime::protocol::LogLevel;
use crate::utils::errors::{OrchestratorError, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

#[async_trait]
pub trait AgentConfigProvider: Send + Sync {
    async fn get_agent_config(&self, agent_id: &str) -> Result<Option<AgentConfig>>;
}

/// Fixed set of configurations keyed by agent id
#[derive(Default)]
pub struct StaticAgentConfigs {
    configs: RwLock<HashMap<String, AgentConfig>>,
}

impl StaticAgentConfigs {
    pub fn new<I>(configs: I) -> Self
    where
        I: IntoIterator<Item = AgentConfig>,
    {
        Self {
            configs: RwLock::new(configs.into_iter().map(|c| (c.id.clone(), c)).collect()),
        }
    }

    pub fn insert(&self, config: AgentConfig) {
        self.configs.write().insert(config.id.clone(), config);
    }
}

#[async_trait]
impl AgentConfigProvider for StaticAgentConfigs {
    async fn get_agent_config(&self, agent_id: &str) -> Result<Option<AgentConfig>> {
        Ok(self.configs.read().get(agent_id).cloned())
    }
}

/// Filesystem locations a unit works in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    pub project_path: PathBuf,
    pub worktree_path: PathBuf,
}

#[async_trait]
pub trait WorkspaceProvider: Send + Sync {
    async fn workspace_for(&self, task: &Task, agent: &AgentConfig) -> Result<Workspace>;
}

/// `{root}/{project_id}` with worktrees under
/// `{root}/{project_id}/worktrees/{task_id}-{agent_name}`. Nothing is
/// created on disk.
#[derive(Debug, Clone)]
pub struct FixedWorkspace {
    root: PathBuf,
}

impl FixedWorkspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl WorkspaceProvider for FixedWorkspace {
    async fn workspace_for(&self, task: &Task, agent: &AgentConfig) -> Result<Workspace> {
        let project_path = self.root.join(&task.project_id);
        let worktree_path = project_path
            .join("worktrees")
            .join(format!("{}-{}", task.id, agent.name));
        Ok(Workspace {
            project_path,
            worktree_path,
        })
    }
}

#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, agent_id: &str, tool: &str, args: &Value) -> Result<Value>;
}

/// Deterministic stubs for `readFile`, `writeFile`, `listDirectory` and
/// `executeShell`. Nothing touches the filesystem.
#[derive(Debug, Clone, Default)]
pub struct MockToolExecutor;

#[async_trait]
impl ToolExecutor for MockToolExecutor {
    async fn execute(&self, agent_id: &str, tool: &str, args: &Value) -> Result<Value> {
        debug!("Mock tool {} for agent {}: {}", tool, agent_id, args);

        let path = args.get("path").and_then(Value::as_str).unwrap_or(".");
        match tool {
            "readFile" => Ok(json!(format!("Mock content of {}", path))),
            "writeFile" => {
                let bytes = args
                    .get("content")
                    .and_then(Value::as_str)
                    .map_or(0, str::len);
                Ok(json!({ "path": path, "bytesWritten": bytes }))
            }
            "listDirectory" => Ok(json!(["README.md", "package.json", "src"])),
            "executeShell" => Ok(json!({ "stdout": "", "stderr": "", "exitCode": 0 })),
            other => Err(OrchestratorError::UnknownTool(other.to_string())),
        }
    }
}

pub trait LogSink: Send + Sync {
    fn write(&self, agent_id: &str, level: LogLevel, message: &str, metadata: Option<&Value>);
}

/// Forwards unit logs to `tracing` at the matching level
#[derive(Debug, Clone, Default)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn write(&self, agent_id: &str, level: LogLevel, message: &str, metadata: Option<&Value>) {
        let metadata = metadata.map(Value::to_string).unwrap_or_default();
        match level {
            LogLevel::Debug => debug!(agent_id, metadata = %metadata, "Agent log: {}", message),
            LogLevel::Info => info!(agent_id, metadata = %metadata, "Agent log: {}", message),
            LogLevel::Warn => warn!(agent_id, metadata = %metadata, "Agent log: {}", message),
            LogLevel::Error => error!(agent_id, metadata = %metadata, "Agent log: {}", message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_configs() {
        let configs = StaticAgentConfigs::new([AgentConfig::new("a1", "Dev")]);
        assert_eq!(
            configs.get_agent_config("a1").await.unwrap().map(|c| c.name),
            Some("Dev".to_string())
        );
        assert!(configs.get_agent_config("a2").await.unwrap().is_none());

        configs.insert(AgentConfig::new("a2", "Reviewer"));
        assert!(configs.get_agent_config("a2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_fixed_workspace_paths() {
        let ws = FixedWorkspace::new("/srv/ws");
        let task = Task::new("proj", "t").with_id("t1");
        let agent = AgentConfig::new("a1", "Dev");

        let workspace = ws.workspace_for(&task, &agent).await.unwrap();
        assert_eq!(workspace.project_path, PathBuf::from("/srv/ws/proj"));
        assert_eq!(
            workspace.worktree_path,
            PathBuf::from("/srv/ws/proj/worktrees/t1-Dev")
        );
    }

    #[tokio::test]
    async fn test_mock_tools() {
        let tools = MockToolExecutor;

        let content = tools
            .execute("a1", "readFile", &json!({"path": "x"}))
            .await
            .unwrap();
        assert_eq!(content, json!("Mock content of x"));

        let listing = tools.execute("a1", "listDirectory", &json!({})).await.unwrap();
        assert!(listing.is_array());

        let err = tools.execute("a1", "rm", &json!({})).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::UnknownTool(ref t) if t == "rm"));
    }
}
