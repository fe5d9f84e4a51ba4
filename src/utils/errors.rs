// src/utils/errors.rs
//! Error types for the orchestration core
//!
//! Validation, lookup and availability failures are returned synchronously to
//! callers of the public API. `Execution` is only ever produced from the
//! asynchronous execution-unit channel and converted into a task failure.

use crate::domain::agent::AgentStatus;
use crate::domain::task::TaskStatus;
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Invalid transition for task {task_id}: cannot {action} a task that is {from}")]
    InvalidTransition {
        task_id: String,
        from: TaskStatus,
        action: &'static str,
    },

    #[error("Invalid progress {0}: must be within 0..=100")]
    InvalidProgress(u32),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Agent {0} is not running")]
    AgentNotRunning(String),

    #[error("Agent {0} is already running")]
    AgentAlreadyRunning(String),

    #[error("Agent {agent_id} is not available (status: {status})")]
    AgentUnavailable {
        agent_id: String,
        status: AgentStatus,
    },

    #[error("Agent configuration not found: {0}")]
    AgentConfigNotFound(String),

    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("Failed to spawn execution unit: {0}")]
    SpawnFailed(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Tool call failed: {0}")]
    ToolFailed(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl OrchestratorError {
    /// Invalid state transitions and out-of-range input
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            OrchestratorError::InvalidTransition { .. } | OrchestratorError::InvalidProgress(_)
        )
    }

    /// Unknown task or agent
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            OrchestratorError::TaskNotFound(_)
                | OrchestratorError::AgentNotRunning(_)
                | OrchestratorError::AgentConfigNotFound(_)
        )
    }
}

impl From<rusqlite::Error> for OrchestratorError {
    fn from(e: rusqlite::Error) -> Self {
        OrchestratorError::Storage(e.to_string())
    }
}

impl From<config::ConfigError> for OrchestratorError {
    fn from(e: config::ConfigError) -> Self {
        OrchestratorError::Config(e.to_string())
    }
}
