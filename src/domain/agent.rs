// src/domain/agent.rs
//! Agent configuration and runtime status views

use crate::domain::task::Task;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Runtime configuration of a logical agent, supplied when it is started or
/// resolved through an `AgentConfigProvider` at assignment time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub id: String,
    pub name: String,

    #[serde(default)]
    pub role: String,

    #[serde(default)]
    pub system_prompt: String,

    #[serde(default)]
    pub llm_model: String,

    /// Tool names the agent is allowed to call
    #[serde(default)]
    pub capabilities: Vec<String>,

    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: u32,
}

fn default_max_concurrent_tasks() -> u32 {
    1
}

impl AgentConfig {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            role: String::new(),
            system_prompt: String::new(),
            llm_model: String::new(),
            capabilities: vec![],
            max_concurrent_tasks: default_max_concurrent_tasks(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    pub fn with_model(mut self, llm_model: impl Into<String>) -> Self {
        self.llm_model = llm_model.into();
        self
    }

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Working,
    Paused,
    Error,
}

impl AgentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Working => "working",
            AgentStatus::Paused => "paused",
            AgentStatus::Error => "error",
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only copy of a registered agent's runtime state
#[derive(Debug, Clone, Serialize)]
pub struct AgentSnapshot {
    pub worker_id: String,
    pub agent_id: String,
    pub name: String,
    pub status: AgentStatus,
    pub current_task: Option<Task>,
    pub started_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,

    /// Whether an execution unit is currently attached
    pub has_unit: bool,
}

/// Agent counts by status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AgentStats {
    pub total_agents: usize,
    pub active_agents: usize,
    pub idle_agents: usize,
    pub working_agents: usize,
    pub paused_agents: usize,
    pub error_agents: usize,
}

impl AgentStats {
    pub fn from_statuses<I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = AgentStatus>,
    {
        let mut stats = AgentStats::default();
        for status in statuses {
            stats.total_agents += 1;
            match status {
                AgentStatus::Idle => stats.idle_agents += 1,
                AgentStatus::Working => stats.working_agents += 1,
                AgentStatus::Paused => stats.paused_agents += 1,
                AgentStatus::Error => stats.error_agents += 1,
            }
        }
        stats.active_agents = stats.total_agents;
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_from_statuses() {
        let stats = AgentStats::from_statuses([
            AgentStatus::Idle,
            AgentStatus::Working,
            AgentStatus::Working,
            AgentStatus::Error,
        ]);
        assert_eq!(stats.total_agents, 4);
        assert_eq!(stats.active_agents, 4);
        assert_eq!(stats.idle_agents, 1);
        assert_eq!(stats.working_agents, 2);
        assert_eq!(stats.error_agents, 1);
        assert_eq!(stats.paused_agents, 0);
    }

    #[test]
    fn test_config_deserialize_defaults() {
        let cfg: AgentConfig = serde_json::from_str(r#"{"id":"a1","name":"Dev"}"#).unwrap();
        assert_eq!(cfg.max_concurrent_tasks, 1);
        assert!(cfg.capabilities.is_empty());
    }
}
