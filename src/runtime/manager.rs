// src/runtime/manager.rs
//! Agent runtime manager
//!
//! Owns the registry of running agents and drives task execution:
//!
//! ```text
//!  task.enqueued ──notify──┐
//!                          ▼
//!  interval tick ──▶ supervisor ──dequeue──▶ TaskQueueService
//!                          │
//!                          └──spawn──▶ execution unit ──events──▶ pump
//!                                                                  │
//!                      registry (single tokio Mutex) ◀─────────────┘
//! ```
//!
//! Every path that touches agent state (public API, supervisor, unit event
//! pumps) holds the registry lock for the whole operation, so timer ticks
//! and unit messages for the same agent never interleave.
//!
//! Events from a unit the registry no longer points at (terminated or
//! replaced) are dropped. A unit terminated on error or heartbeat timeout
//! leaves its agent in `error` until the unit's event stream closes; the
//! agent then goes back to `idle`.

use crate::domain::agent::{AgentConfig, AgentSnapshot, AgentStats, AgentStatus};
use crate::domain::task::Task;
use crate::events::{EventBus, EventPayload, Subscription, Topic};
use crate::observability::metric_names;
use crate::queue::TaskQueueService;
use crate::runtime::collaborators::{
    AgentConfigProvider, FixedWorkspace, LogSink, MockToolExecutor, ToolExecutor, TracingLogSink,
    WorkspaceProvider,
};
use crate::runtime::protocol::{CoordinatorMessage, TaskSummary, UnitMessage, WorkStatus, WorkerPayload};
use crate::runtime::unit::{SpawnedUnit, UnitEvent, UnitHandle, UnitSpawner};
use crate::utils::errors::{OrchestratorError, Result};
use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Supervision tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeSettings {
    /// Period of the dispatch + heartbeat pass
    pub check_interval: Duration,

    /// Silence after which a working agent is marked `error`
    pub heartbeat_timeout: Duration,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(5),
            heartbeat_timeout: Duration::from_secs(60),
        }
    }
}

struct ActiveAgent {
    worker_id: String,
    agent_id: String,
    config: AgentConfig,
    unit: Option<UnitHandle>,

    /// Unit terminated on error or timeout. Its close returns the agent to
    /// idle.
    retiring: Option<String>,
    current_task: Option<Task>,
    status: AgentStatus,
    started_at: DateTime<Utc>,
    last_heartbeat: Instant,
    last_heartbeat_at: DateTime<Utc>,
}

impl ActiveAgent {
    fn touch(&mut self) {
        self.last_heartbeat = Instant::now();
        self.last_heartbeat_at = Utc::now();
    }

    fn owns_unit(&self, unit_id: &str) -> bool {
        self.unit.as_ref().map(UnitHandle::id) == Some(unit_id)
    }

    fn detach_unit(&mut self) {
        if let Some(unit) = self.unit.take() {
            unit.terminate();
        }
    }

    /// Terminate the unit but keep the agent in `error` until it is gone
    fn retire_unit(&mut self) {
        if let Some(unit) = self.unit.take() {
            self.retiring = Some(unit.id().to_string());
            unit.terminate();
        }
    }

    fn snapshot(&self) -> AgentSnapshot {
        AgentSnapshot {
            worker_id: self.worker_id.clone(),
            agent_id: self.agent_id.clone(),
            name: self.config.name.clone(),
            status: self.status,
            current_task: self.current_task.clone(),
            started_at: self.started_at,
            last_heartbeat: self.last_heartbeat_at,
            has_unit: self.unit.is_some(),
        }
    }
}

struct Supervisor {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct ManagerInner {
    queue: TaskQueueService,
    bus: EventBus,
    spawner: Arc<dyn UnitSpawner>,
    tools: Arc<dyn ToolExecutor>,
    configs: Option<Arc<dyn AgentConfigProvider>>,
    workspace: Arc<dyn WorkspaceProvider>,
    log_sink: Arc<dyn LogSink>,
    settings: RuntimeSettings,
    registry: Mutex<HashMap<String, ActiveAgent>>,
    supervisor: parking_lot::Mutex<Option<Supervisor>>,
    dispatch: Arc<Notify>,
    enqueued: parking_lot::Mutex<Option<Subscription>>,
}

/// Cloneable handle to the runtime manager
#[derive(Clone)]
pub struct AgentRuntimeManager {
    inner: Arc<ManagerInner>,
}

pub struct AgentRuntimeManagerBuilder {
    queue: TaskQueueService,
    bus: EventBus,
    spawner: Arc<dyn UnitSpawner>,
    tools: Option<Arc<dyn ToolExecutor>>,
    configs: Option<Arc<dyn AgentConfigProvider>>,
    workspace: Option<Arc<dyn WorkspaceProvider>>,
    log_sink: Option<Arc<dyn LogSink>>,
    settings: RuntimeSettings,
}

impl AgentRuntimeManagerBuilder {
    /// Defaults to [`MockToolExecutor`]
    pub fn tool_executor(mut self, tools: Arc<dyn ToolExecutor>) -> Self {
        self.tools = Some(tools);
        self
    }

    /// When set, dispatch resolves configurations here instead of using the
    /// one given to `start_agent`
    pub fn config_provider(mut self, configs: Arc<dyn AgentConfigProvider>) -> Self {
        self.configs = Some(configs);
        self
    }

    /// Defaults to [`FixedWorkspace`] rooted at `./workspace`
    pub fn workspace(mut self, workspace: Arc<dyn WorkspaceProvider>) -> Self {
        self.workspace = Some(workspace);
        self
    }

    /// Defaults to [`TracingLogSink`]
    pub fn log_sink(mut self, log_sink: Arc<dyn LogSink>) -> Self {
        self.log_sink = Some(log_sink);
        self
    }

    pub fn settings(mut self, settings: RuntimeSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> AgentRuntimeManager {
        let dispatch = Arc::new(Notify::new());

        let signal = Arc::clone(&dispatch);
        let enqueued = self.bus.subscribe(Topic::TaskEnqueued, move |_| signal.notify_one());

        let inner = ManagerInner {
            queue: self.queue,
            bus: self.bus,
            spawner: self.spawner,
            tools: self.tools.unwrap_or_else(|| Arc::new(MockToolExecutor)),
            configs: self.configs,
            workspace: self
                .workspace
                .unwrap_or_else(|| Arc::new(FixedWorkspace::new("./workspace"))),
            log_sink: self.log_sink.unwrap_or_else(|| Arc::new(TracingLogSink)),
            settings: self.settings,
            registry: Mutex::new(HashMap::new()),
            supervisor: parking_lot::Mutex::new(None),
            dispatch,
            enqueued: parking_lot::Mutex::new(Some(enqueued)),
        };

        info!(
            "Agent runtime manager ready (check interval: {:?}, heartbeat timeout: {:?})",
            inner.settings.check_interval, inner.settings.heartbeat_timeout
        );

        AgentRuntimeManager {
            inner: Arc::new(inner),
        }
    }
}

impl AgentRuntimeManager {
    pub fn builder(
        queue: TaskQueueService,
        bus: EventBus,
        spawner: Arc<dyn UnitSpawner>,
    ) -> AgentRuntimeManagerBuilder {
        AgentRuntimeManagerBuilder {
            queue,
            bus,
            spawner,
            tools: None,
            configs: None,
            workspace: None,
            log_sink: None,
            settings: RuntimeSettings::default(),
        }
    }

    /// Register an idle agent. Starts supervision with the first agent.
    pub async fn start_agent(&self, agent_id: &str, config: AgentConfig) -> Result<AgentSnapshot> {
        let inner = &self.inner;
        let mut registry = inner.registry.lock().await;
        if registry.contains_key(agent_id) {
            return Err(OrchestratorError::AgentAlreadyRunning(agent_id.to_string()));
        }

        let now = Utc::now();
        let agent = ActiveAgent {
            worker_id: format!("{}-{}", agent_id, now.timestamp_millis()),
            agent_id: agent_id.to_string(),
            config,
            unit: None,
            retiring: None,
            current_task: None,
            status: AgentStatus::Idle,
            started_at: now,
            last_heartbeat: Instant::now(),
            last_heartbeat_at: now,
        };
        let snapshot = agent.snapshot();
        registry.insert(agent_id.to_string(), agent);
        gauge!(metric_names::AGENTS_ACTIVE).set(registry.len() as f64);

        if registry.len() == 1 {
            inner.start_supervisor();
        }
        drop(registry);

        info!(
            "Agent started: {} (worker: {}, name: {})",
            agent_id, snapshot.worker_id, snapshot.name
        );

        inner.bus.publish(EventPayload::AgentStarted {
            agent_id: agent_id.to_string(),
            worker_id: snapshot.worker_id.clone(),
            name: snapshot.name.clone(),
            status: AgentStatus::Idle,
        });

        Ok(snapshot)
    }

    /// Terminate the agent's unit and unregister it. Stops supervision when
    /// the last agent goes. A task the agent was running is left as is.
    pub async fn stop_agent(&self, agent_id: &str) -> Result<()> {
        let inner = &self.inner;
        let mut registry = inner.registry.lock().await;
        let mut agent = registry
            .remove(agent_id)
            .ok_or_else(|| OrchestratorError::AgentNotRunning(agent_id.to_string()))?;

        agent.detach_unit();
        if let Some(task) = &agent.current_task {
            warn!(
                "Agent {} stopped while task {} was {}",
                agent_id, task.id, task.status
            );
        }

        gauge!(metric_names::AGENTS_ACTIVE).set(registry.len() as f64);
        if registry.is_empty() {
            inner.stop_supervisor();
        }
        drop(registry);

        info!("Agent stopped: {} (worker: {})", agent_id, agent.worker_id);
        inner.bus.publish(EventPayload::AgentStopped {
            agent_id: agent_id.to_string(),
        });

        Ok(())
    }

    /// Stop every registered agent, returning their ids
    pub async fn stop_all_agents(&self) -> Vec<String> {
        let ids: Vec<String> = self.inner.registry.lock().await.keys().cloned().collect();
        let mut stopped = Vec::with_capacity(ids.len());
        for id in ids {
            if self.stop_agent(&id).await.is_ok() {
                stopped.push(id);
            }
        }
        stopped
    }

    /// Spawn a unit for `task` on an idle agent
    pub async fn assign_task_to_agent(
        &self,
        agent_id: &str,
        task: Task,
        config: &AgentConfig,
    ) -> Result<()> {
        let inner = &self.inner;
        let mut registry = inner.registry.lock().await;
        let agent = registry
            .get_mut(agent_id)
            .ok_or_else(|| OrchestratorError::AgentNotRunning(agent_id.to_string()))?;

        if agent.status != AgentStatus::Idle {
            return Err(OrchestratorError::AgentUnavailable {
                agent_id: agent_id.to_string(),
                status: agent.status,
            });
        }

        inner.assign(agent, task, config).await
    }

    /// Snapshots of every registered agent, ordered by id
    pub async fn get_active_agents(&self) -> Vec<AgentSnapshot> {
        let registry = self.inner.registry.lock().await;
        let mut agents: Vec<AgentSnapshot> = registry.values().map(ActiveAgent::snapshot).collect();
        agents.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        agents
    }

    pub async fn get_agent(&self, agent_id: &str) -> Option<AgentSnapshot> {
        self.inner
            .registry
            .lock()
            .await
            .get(agent_id)
            .map(ActiveAgent::snapshot)
    }

    pub async fn get_agent_status(&self, agent_id: &str) -> Option<AgentStatus> {
        self.inner
            .registry
            .lock()
            .await
            .get(agent_id)
            .map(|a| a.status)
    }

    pub async fn get_agent_stats(&self) -> AgentStats {
        let registry = self.inner.registry.lock().await;
        AgentStats::from_statuses(registry.values().map(|a| a.status))
    }

    /// Whether the supervision loop is running
    pub fn is_supervising(&self) -> bool {
        self.inner
            .supervisor
            .lock()
            .as_ref()
            .map_or(false, |s| !s.handle.is_finished())
    }

    pub fn settings(&self) -> RuntimeSettings {
        self.inner.settings
    }
}

impl ManagerInner {
    fn start_supervisor(self: &Arc<Self>) {
        let mut slot = self.supervisor.lock();
        if slot.is_some() {
            return;
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(supervise(
            Arc::downgrade(self),
            cancel.clone(),
            Arc::clone(&self.dispatch),
            self.settings.check_interval,
        ));
        *slot = Some(Supervisor { cancel, handle });

        info!("Supervision loop started");
    }

    fn stop_supervisor(&self) {
        if let Some(supervisor) = self.supervisor.lock().take() {
            supervisor.cancel.cancel();
            info!("Supervision loop stopped");
        }
    }

    async fn assign(
        self: &Arc<Self>,
        agent: &mut ActiveAgent,
        mut task: Task,
        config: &AgentConfig,
    ) -> Result<()> {
        if task.assigned_agent_id.as_deref() != Some(agent.agent_id.as_str()) {
            if let Err(e) = self.queue.record_assignment(&task.id, &agent.agent_id).await {
                warn!("Failed to record assignment of task {} to agent {}: {}", task.id, agent.agent_id, e);
            }
            task.assigned_agent_id = Some(agent.agent_id.clone());
        }

        let workspace = self.workspace.workspace_for(&task, config).await?;
        let payload = WorkerPayload {
            agent_id: agent.agent_id.clone(),
            agent_config: config.clone(),
            task: TaskSummary::from(&task),
            project_path: workspace.project_path,
            worktree_path: workspace.worktree_path,
        };

        let SpawnedUnit { handle, events } = self.spawner.spawn(payload).await?;
        let unit_id = handle.id().to_string();
        tokio::spawn(pump(
            Arc::downgrade(self),
            agent.agent_id.clone(),
            unit_id.clone(),
            events,
        ));

        agent.detach_unit();
        agent.unit = Some(handle);
        agent.status = AgentStatus::Working;
        agent.touch();

        info!(
            "Task {} assigned to agent {} (unit: {})",
            task.id, agent.agent_id, unit_id
        );
        agent.current_task = Some(task);

        Ok(())
    }

    /// Offer the head of the queue to every idle agent
    async fn dispatch_pending(self: &Arc<Self>) {
        let mut registry = self.registry.lock().await;

        let mut idle: Vec<String> = registry
            .values()
            .filter(|a| a.status == AgentStatus::Idle)
            .map(|a| a.agent_id.clone())
            .collect();
        idle.sort();

        for agent_id in idle {
            let task = match self.queue.dequeue_next_task(Some(&agent_id)).await {
                Ok(Some(task)) => task,
                Ok(None) => continue,
                Err(e) => {
                    error!("Failed to dequeue task for agent {}: {}", agent_id, e);
                    continue;
                }
            };

            let Some(agent) = registry.get_mut(&agent_id) else {
                continue;
            };

            let outcome = match self.resolve_config(agent).await {
                Ok(config) => self.assign(agent, task.clone(), &config).await,
                Err(e) => Err(e),
            };

            if let Err(e) = outcome {
                error!("Failed to assign task {} to agent {}: {}", task.id, agent_id, e);
                if let Err(fail_err) = self.queue.fail_task(&task.id, &e.to_string()).await {
                    error!("Failed to mark task {} as failed: {}", task.id, fail_err);
                }
            }
        }
    }

    async fn resolve_config(&self, agent: &ActiveAgent) -> Result<AgentConfig> {
        match &self.configs {
            Some(provider) => provider
                .get_agent_config(&agent.agent_id)
                .await?
                .ok_or_else(|| OrchestratorError::AgentConfigNotFound(agent.agent_id.clone())),
            None => Ok(agent.config.clone()),
        }
    }

    /// Mark silent working agents as failed and kill their units.
    ///
    /// Agents without a unit have nothing to report and are never flagged.
    async fn check_heartbeats(&self) {
        let now = Instant::now();
        let timeout = self.settings.heartbeat_timeout;
        let mut registry = self.registry.lock().await;

        for agent in registry.values_mut() {
            if agent.unit.is_none() || agent.status == AgentStatus::Error {
                continue;
            }

            let silent = now.saturating_duration_since(agent.last_heartbeat);
            if silent <= timeout {
                continue;
            }

            warn!(
                "Agent heartbeat timeout: {} (last heartbeat: {}, silent for {:?})",
                agent.agent_id, agent.last_heartbeat_at, silent
            );
            counter!(metric_names::HEARTBEAT_TIMEOUTS).increment(1);

            agent.status = AgentStatus::Error;
            agent.retire_unit();
            if let Some(task) = &agent.current_task {
                warn!(
                    "Task {} stays {} after heartbeat timeout of agent {}",
                    task.id, task.status, agent.agent_id
                );
            }
        }
    }

    async fn handle_unit_event(self: &Arc<Self>, agent_id: &str, unit_id: &str, event: UnitEvent) {
        let mut registry = self.registry.lock().await;
        let Some(agent) = registry.get_mut(agent_id) else {
            debug!("Dropping event from unit {} of unknown agent {}", unit_id, agent_id);
            return;
        };
        if !agent.owns_unit(unit_id) {
            debug!("Dropping event from detached unit {} of agent {}", unit_id, agent_id);
            return;
        }

        match event {
            UnitEvent::Message(message) => {
                agent.touch();
                self.handle_message(agent, message).await;
            }
            UnitEvent::Failed(error) => self.handle_failure(agent, &error).await,
            UnitEvent::Exited(code) => self.handle_exit(agent, code),
        }
    }

    async fn handle_message(self: &Arc<Self>, agent: &mut ActiveAgent, message: UnitMessage) {
        let agent_id = agent.agent_id.clone();

        match message {
            UnitMessage::Status {
                status: WorkStatus::Completed,
                task_id,
                result,
            } => {
                info!("Agent status update: {} completed task {}", agent_id, task_id);

                match self.queue.complete_task(&task_id).await {
                    Ok(_) => {
                        self.bus.publish(EventPayload::AgentTaskCompleted {
                            agent_id: agent_id.clone(),
                            task_id,
                            result,
                        });
                    }
                    Err(e) if e.is_validation() => {
                        warn!("Ignoring completion of task {} from agent {}: {}", task_id, agent_id, e);
                    }
                    Err(e) => {
                        error!("Failed to complete task {} for agent {}: {}", task_id, agent_id, e);
                    }
                }

                agent.status = AgentStatus::Idle;
                agent.current_task = None;
                self.dispatch.notify_one();
            }
            UnitMessage::Status {
                status,
                task_id,
                ..
            } => {
                info!("Agent status update: {} {} task {}", agent_id, status, task_id);
                self.bus.publish(EventPayload::AgentStatusUpdate {
                    agent_id,
                    task_id,
                    status,
                });
            }
            UnitMessage::Progress {
                task_id,
                progress,
                message,
            } => {
                debug!("Agent progress: {} task {} at {}%", agent_id, task_id, progress);
                self.bus.publish(EventPayload::AgentProgress {
                    agent_id,
                    task_id,
                    progress,
                    message,
                });
            }
            UnitMessage::Log {
                level,
                message,
                metadata,
            } => {
                self.log_sink.write(&agent_id, level, &message, metadata.as_ref());
                self.bus.publish(EventPayload::AgentLog {
                    agent_id,
                    level,
                    message,
                    metadata,
                });
            }
            UnitMessage::ToolCall { tool, args, id } => {
                let Some(unit) = agent.unit.as_ref() else {
                    return;
                };
                self.spawn_tool_call(agent_id, unit.outbox(), tool, args, id);
            }
            UnitMessage::Error { error } => self.handle_failure(agent, &error).await,
        }
    }

    /// Run the tool off the registry lock and reply exactly once
    fn spawn_tool_call(
        &self,
        agent_id: String,
        outbox: mpsc::UnboundedSender<CoordinatorMessage>,
        tool: String,
        args: serde_json::Value,
        id: String,
    ) {
        debug!("Agent tool call: {} {} (id: {})", agent_id, tool, id);
        counter!(metric_names::TOOL_CALLS).increment(1);

        let tools = Arc::clone(&self.tools);
        tokio::spawn(async move {
            let result = match tools.execute(&agent_id, &tool, &args).await {
                Ok(result) => result,
                Err(e) => {
                    error!("Error executing tool {} for agent {}: {}", tool, agent_id, e);
                    serde_json::json!({ "error": e.to_string() })
                }
            };

            if outbox
                .send(CoordinatorMessage::ToolResponse { id: id.clone(), result })
                .is_err()
            {
                debug!("Unit of agent {} is gone, dropping tool response {}", agent_id, id);
            }
        });
    }

    async fn handle_failure(&self, agent: &mut ActiveAgent, error: &str) {
        error!("Agent worker error: {}: {}", agent.agent_id, error);

        agent.status = AgentStatus::Error;
        if let Some(task) = agent.current_task.take() {
            match self.queue.fail_task(&task.id, error).await {
                Ok(_) => {}
                Err(e) if e.is_validation() => {
                    warn!("Task {} already settled, not failing it: {}", task.id, e);
                }
                Err(e) => error!("Failed to mark task {} as failed: {}", task.id, e),
            }
        }
        agent.retire_unit();

        self.bus.publish(EventPayload::AgentError {
            agent_id: agent.agent_id.clone(),
            error: error.to_string(),
        });
    }

    fn handle_exit(&self, agent: &mut ActiveAgent, code: Option<i32>) {
        info!("Agent worker exited: {} (exit code: {:?})", agent.agent_id, code);

        if let Some(task) = &agent.current_task {
            warn!(
                "Unit of agent {} exited without reporting; task {} left in progress",
                agent.agent_id, task.id
            );
        }

        agent.status = AgentStatus::Idle;
        agent.current_task = None;
        agent.unit = None;
        agent.retiring = None;
        self.dispatch.notify_one();
    }

    /// The unit's event stream ended, so the unit is gone
    async fn handle_unit_closed(&self, agent_id: &str, unit_id: &str) {
        let mut registry = self.registry.lock().await;
        let Some(agent) = registry.get_mut(agent_id) else {
            return;
        };

        if agent.owns_unit(unit_id) {
            self.handle_exit(agent, None);
        } else if agent.retiring.as_deref() == Some(unit_id) {
            info!("Terminated unit {} of agent {} is gone", unit_id, agent_id);
            self.handle_exit(agent, None);
        }
    }
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        if let Some(subscription) = self.enqueued.lock().take() {
            subscription.unsubscribe();
        }
        if let Some(supervisor) = self.supervisor.lock().take() {
            supervisor.cancel.cancel();
        }
    }
}

async fn supervise(
    inner: Weak<ManagerInner>,
    cancel: CancellationToken,
    dispatch: Arc<Notify>,
    period: Duration,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let Some(inner) = inner.upgrade() else { break };
                inner.dispatch_pending().await;
                inner.check_heartbeats().await;
            }
            _ = dispatch.notified() => {
                let Some(inner) = inner.upgrade() else { break };
                inner.dispatch_pending().await;
            }
        }
    }

    debug!("Supervision loop exited");
}

async fn pump(
    inner: Weak<ManagerInner>,
    agent_id: String,
    unit_id: String,
    mut events: mpsc::UnboundedReceiver<UnitEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        inner.handle_unit_event(&agent_id, &unit_id, event).await;
    }

    if let Some(inner) = inner.upgrade() {
        inner.handle_unit_closed(&agent_id, &unit_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::task::TaskStatus;
    use crate::events::EventJournal;
    use crate::queue::InMemoryTaskRepository;
    use crate::runtime::in_process::{InProcessSpawner, UnitContext};

    fn manager_with(spawner: InProcessSpawner) -> (AgentRuntimeManager, TaskQueueService) {
        let bus = EventBus::new();
        let queue = TaskQueueService::new(Arc::new(InMemoryTaskRepository::new()), bus.clone());
        let manager = AgentRuntimeManager::builder(queue.clone(), bus, Arc::new(spawner)).build();
        (manager, queue)
    }

    fn idle_worker() -> InProcessSpawner {
        InProcessSpawner::new(|mut ctx: UnitContext| async move {
            while ctx.recv().await.is_some() {}
            Ok(())
        })
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let (manager, _queue) = manager_with(idle_worker());

        let snapshot = manager.start_agent("a1", AgentConfig::new("a1", "Dev")).await.unwrap();
        assert_eq!(snapshot.status, AgentStatus::Idle);
        assert!(snapshot.worker_id.starts_with("a1-"));
        assert!(manager.is_supervising());

        let err = manager
            .start_agent("a1", AgentConfig::new("a1", "Dev"))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::AgentAlreadyRunning(_)));

        manager.stop_agent("a1").await.unwrap();
        assert!(!manager.is_supervising());
        assert!(manager.get_agent_status("a1").await.is_none());

        let err = manager.stop_agent("a1").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_assign_requires_idle_running_agent() {
        let (manager, _queue) = manager_with(idle_worker());
        let config = AgentConfig::new("a1", "Dev");

        let err = manager
            .assign_task_to_agent("a1", Task::new("p", "t"), &config)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::AgentNotRunning(_)));

        manager.start_agent("a1", config.clone()).await.unwrap();
        manager
            .assign_task_to_agent("a1", Task::new("p", "t1"), &config)
            .await
            .unwrap();

        let agent = manager.get_agent("a1").await.unwrap();
        assert_eq!(agent.status, AgentStatus::Working);
        assert!(agent.has_unit);
        assert_eq!(agent.current_task.map(|t| t.title), Some("t1".to_string()));

        let err = manager
            .assign_task_to_agent("a1", Task::new("p", "t2"), &config)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::AgentUnavailable {
                status: AgentStatus::Working,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_stats() {
        let (manager, _queue) = manager_with(idle_worker());
        let config = AgentConfig::new("a1", "Dev");

        manager.start_agent("a1", config.clone()).await.unwrap();
        manager.start_agent("a2", AgentConfig::new("a2", "Qa")).await.unwrap();
        manager
            .assign_task_to_agent("a1", Task::new("p", "t"), &config)
            .await
            .unwrap();

        let stats = manager.get_agent_stats().await;
        assert_eq!(stats.total_agents, 2);
        assert_eq!(stats.working_agents, 1);
        assert_eq!(stats.idle_agents, 1);

        let ids: Vec<_> = manager
            .get_active_agents()
            .await
            .into_iter()
            .map(|a| a.agent_id)
            .collect();
        assert_eq!(ids, vec!["a1", "a2"]);

        assert_eq!(manager.stop_all_agents().await.len(), 2);
        assert_eq!(manager.get_agent_stats().await, AgentStats::default());
    }

    #[tokio::test]
    async fn test_drop_unsubscribes() {
        let bus = EventBus::new();
        let queue = TaskQueueService::new(Arc::new(InMemoryTaskRepository::new()), bus.clone());
        let manager =
            AgentRuntimeManager::builder(queue, bus.clone(), Arc::new(idle_worker())).build();
        assert_eq!(bus.subscriber_count(Topic::TaskEnqueued), 1);

        drop(manager);
        assert_eq!(bus.subscriber_count(Topic::TaskEnqueued), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_agent_without_unit_never_times_out() {
        let bus = EventBus::new();
        let queue = TaskQueueService::new(Arc::new(InMemoryTaskRepository::new()), bus.clone());
        let manager = AgentRuntimeManager::builder(queue, bus, Arc::new(idle_worker()))
            .settings(RuntimeSettings {
                check_interval: Duration::from_secs(1),
                heartbeat_timeout: Duration::from_secs(60),
            })
            .build();

        manager.start_agent("a1", AgentConfig::new("a1", "Dev")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(180)).await;

        let agent = manager.get_agent("a1").await.unwrap();
        assert_eq!(agent.status, AgentStatus::Idle);
        assert!(!agent.has_unit);
        assert!(agent.current_task.is_none());
    }

    #[tokio::test]
    async fn test_direct_assign_records_assignee() {
        let bus = EventBus::new();
        let journal = EventJournal::attach(&bus, 128);
        let queue = TaskQueueService::new(Arc::new(InMemoryTaskRepository::new()), bus.clone());
        let manager =
            AgentRuntimeManager::builder(queue.clone(), bus, Arc::new(InProcessSpawner::reference()))
                .build();
        let config = AgentConfig::new("a1", "Dev");
        manager.start_agent("a1", config.clone()).await.unwrap();

        queue.enqueue_task(&Task::new("p", "unassigned")).await.unwrap();
        let task = queue.dequeue_next_task(None).await.unwrap().unwrap();
        let task_id = task.id.clone();
        manager.assign_task_to_agent("a1", task, &config).await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let stored = queue.get_task_status(&task_id).await.unwrap().unwrap();
                if stored.status == TaskStatus::Completed {
                    assert_eq!(stored.assigned_agent_id.as_deref(), Some("a1"));
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        let completed = journal
            .drain()
            .into_iter()
            .find(|e| e.topic == Topic::TaskCompleted)
            .unwrap();
        match completed.payload {
            EventPayload::TaskCompleted { agent_id, .. } => {
                assert_eq!(agent_id.as_deref(), Some("a1"));
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }
}
