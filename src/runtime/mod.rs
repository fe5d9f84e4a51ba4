// src/runtime/mod.rs
//! Agent runtime
//!
//! - **protocol**: messages exchanged with execution units
//! - **unit**: execution unit handle and the spawner seam
//! - **in_process** / **process**: spawner implementations (tokio task or
//!   child process speaking JSON lines)
//! - **collaborators**: configuration, workspace, tool and log seams
//! - **manager**: agent registry, dispatch and supervision
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │            AgentRuntimeManager               │
//! │   registry ─── supervisor ─── event pumps    │
//! └──────┬──────────────┬───────────────▲────────┘
//!        │ dequeue      │ spawn         │ UnitEvent
//!        ▼              ▼               │
//!  TaskQueueService  UnitSpawner ──▶ execution unit
//! ```

pub mod collaborators;
pub mod in_process;
pub mod manager;
pub mod process;
pub mod protocol;
pub mod unit;

pub use collaborators::{
    AgentConfigProvider, FixedWorkspace, LogSink, MockToolExecutor, StaticAgentConfigs,
    ToolExecutor, TracingLogSink, Workspace, WorkspaceProvider,
};
pub use in_process::{InProcessSpawner, UnitContext};
pub use manager::{AgentRuntimeManager, AgentRuntimeManagerBuilder, RuntimeSettings};
pub use process::{ProcessSpawner, WorkerCommand};
pub use protocol::{CoordinatorMessage, LogLevel, TaskSummary, UnitMessage, WorkStatus, WorkerPayload};
pub use unit::{SpawnedUnit, UnitEvent, UnitHandle, UnitSpawner};
