// src/domain/mod.rs
//! Domain types
//!
//! - **Task**: unit of work with a bounded lifecycle
//! - **Agent**: configuration and runtime status of a logical worker

pub mod agent;
pub mod task;

pub use agent::{AgentConfig, AgentSnapshot, AgentStats, AgentStatus};
pub use task::{Task, TaskPriority, TaskStatus, TaskType};
