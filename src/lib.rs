// src/lib.rs
//! Agent Orchestrator Library
//!
//! Coordination core for autonomous development agents: a persistent,
//! priority-ordered task queue and a runtime that runs agents as isolated
//! execution units, dispatches queued work to idle agents and supervises
//! them through heartbeats.
//!
//! # Architecture
//!
//! - **domain**: tasks, their state machine and agent records
//! - **events**: in-process publish/subscribe bus and event journal
//! - **queue**: task repository port (memory, SQLite) and queue service
//! - **runtime**: execution units, message protocol and the runtime manager
//! - **observability**: tracing subscriber and metrics exporter
//! - **utils**: configuration and error types

// Public module exports
pub mod domain;
pub mod events;
pub mod observability;
pub mod queue;
pub mod runtime;
pub mod utils;

// Re-export commonly used types
pub use domain::{AgentConfig, AgentStatus, Task, TaskPriority, TaskStatus, TaskType};
pub use events::{Event, EventBus, EventPayload, Topic};
pub use queue::{TaskQueueService, TaskRepository};
pub use runtime::{AgentRuntimeManager, RuntimeSettings};
pub use utils::config::OrchestratorConfig;
pub use utils::errors::{OrchestratorError, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const GIT_HASH: &str = env!("GIT_HASH");

/// Orchestrator build information
pub struct BuildInfo {
    pub version: &'static str,
    pub git_hash: &'static str,
    pub build_timestamp: &'static str,
    pub rustc_version: &'static str,
}

impl BuildInfo {
    pub fn current() -> Self {
        Self {
            version: VERSION,
            git_hash: GIT_HASH,
            build_timestamp: env!("BUILD_TIMESTAMP"),
            rustc_version: env!("RUSTC_VERSION"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_build_info() {
        let info = BuildInfo::current();
        assert!(!info.version.is_empty());
        assert!(!info.git_hash.is_empty());
    }
}
