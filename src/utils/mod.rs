// src/utils/mod.rs
//! Shared utilities: error types and configuration loading

pub mod config;
pub mod errors;

pub use config::OrchestratorConfig;
pub use errors::{OrchestratorError, Result};
