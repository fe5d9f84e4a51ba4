// src/queue/mod.rs
//! Task queue
//!
//! - **repository**: persistence port and ordering rules
//! - **memory** / **sqlite**: port implementations
//! - **service**: lifecycle transitions plus `task.*` events

pub mod memory;
pub mod repository;
pub mod service;
pub mod sqlite;

pub use memory::InMemoryTaskRepository;
pub use repository::{TaskPage, TaskRepository};
pub use service::TaskQueueService;
pub use sqlite::SqliteTaskRepository;
