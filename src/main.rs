// src/main.rs
//! Agent Orchestrator daemon
//!
//! Boots the task queue and agent runtime, starts the configured agents and
//! runs until Ctrl-C. Tasks are enqueued by an external command layer
//! sharing the same storage.

use agent_orchestrator::events::{EventBus, EventJournal};
use agent_orchestrator::observability::{init_metrics, init_tracing};
use agent_orchestrator::queue::{InMemoryTaskRepository, SqliteTaskRepository, TaskQueueService, TaskRepository};
use agent_orchestrator::runtime::{
    AgentRuntimeManager, FixedWorkspace, InProcessSpawner, ProcessSpawner, StaticAgentConfigs,
    UnitSpawner, WorkerCommand,
};
use agent_orchestrator::utils::config::{OrchestratorConfig, StorageBackend};
use agent_orchestrator::BuildInfo;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = OrchestratorConfig::load().context("Failed to load configuration")?;

    // Initialize observability (tracing, metrics)
    init_tracing(&config.logging)?;
    init_metrics(&config.metrics)?;

    let build = BuildInfo::current();
    info!(
        "Starting Agent Orchestrator v{} ({}, built with {})",
        build.version, build.git_hash, build.rustc_version
    );
    info!("Configuration loaded: {:?}", config);

    let repository: Arc<dyn TaskRepository> = match config.storage.backend {
        StorageBackend::Memory => {
            info!("Using in-memory task storage");
            Arc::new(InMemoryTaskRepository::new())
        }
        StorageBackend::Sqlite => {
            info!("Using SQLite task storage at {:?}", config.storage.sqlite_path);
            Arc::new(SqliteTaskRepository::open(&config.storage.sqlite_path).await?)
        }
    };

    let bus = EventBus::new();
    let mut journal = EventJournal::attach(&bus, config.journal_capacity);
    let queue = TaskQueueService::new(repository, bus.clone());

    let spawner: Arc<dyn UnitSpawner> = match &config.worker.command {
        Some(program) => {
            info!("Execution units run as child processes: {}", program);
            let mut command = WorkerCommand::new(program);
            command.args = config.worker.args.clone();
            command.env = config
                .worker
                .env
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            command.terminate_grace = Duration::from_millis(config.worker.terminate_grace_ms);
            Arc::new(ProcessSpawner::new(command))
        }
        None => {
            info!("Execution units run the in-process reference worker");
            Arc::new(InProcessSpawner::reference())
        }
    };

    let manager = AgentRuntimeManager::builder(queue.clone(), bus.clone(), spawner)
        .config_provider(Arc::new(StaticAgentConfigs::new(config.agents.iter().cloned())))
        .workspace(Arc::new(FixedWorkspace::new(&config.runtime.workspace_root)))
        .settings(config.runtime_settings())
        .build();

    for agent in &config.agents {
        if let Err(e) = manager.start_agent(&agent.id, agent.clone()).await {
            error!("Failed to start agent {}: {}", agent.id, e);
        }
    }

    let pending = queue.get_queued_tasks_count(None).await?;
    info!(
        "{} agents running, {} tasks pending",
        manager.get_active_agents().await.len(),
        pending
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to install CTRL+C signal handler")?;
    info!("Received shutdown signal, cleaning up...");

    let stopped = manager.stop_all_agents().await;
    info!("Stopped {} agents", stopped.len());

    let stats = journal.stats();
    info!(
        "Event journal: {} recorded, {} overwritten ({:.1}% overwrite rate), {} retained",
        stats.push_count,
        stats.overwrite_count,
        stats.overwrite_rate(),
        stats.current_size
    );
    journal.detach();

    info!("Orchestrator stopped gracefully");
    Ok(())
}
