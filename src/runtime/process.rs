// src/runtime/process.rs
//! Subprocess execution units
//!
//! The worker program receives the [`WorkerPayload`] as the first JSON line
//! on stdin, then `tool_response` lines. It reports by writing protocol
//! messages as JSON lines to stdout. stderr is forwarded to the debug log.

use crate::runtime::protocol::{CoordinatorMessage, UnitMessage, WorkerPayload};
use crate::runtime::unit::{SpawnedUnit, UnitEvent, UnitHandle, UnitSpawner};
use crate::utils::errors::{OrchestratorError, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use ulid::Ulid;

/// Longest accepted output line
const MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Worker program to launch for every unit
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,

    /// Wait between SIGTERM and SIGKILL on termination
    pub terminate_grace: Duration,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: vec![],
            env: vec![],
            terminate_grace: Duration::from_secs(2),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

pub struct ProcessSpawner {
    command: WorkerCommand,
}

impl ProcessSpawner {
    pub fn new(command: WorkerCommand) -> Self {
        Self { command }
    }

    fn build(&self, payload: &WorkerPayload) -> Command {
        let mut command = Command::new(&self.command.program);
        command
            .args(&self.command.args)
            .envs(self.command.env.iter().map(|(k, v)| (k, v)))
            .env("ORCHESTRATOR_AGENT_ID", &payload.agent_id)
            .env("ORCHESTRATOR_TASK_ID", &payload.task.id)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl UnitSpawner for ProcessSpawner {
    async fn spawn(&self, payload: WorkerPayload) -> Result<SpawnedUnit> {
        let unit_id = Ulid::new().to_string();
        debug!("Spawning worker process {:?} for unit {}", self.command.program, unit_id);

        let mut child = self.build(&payload).spawn().map_err(|e| {
            OrchestratorError::SpawnFailed(format!(
                "Failed to spawn {:?}: {}",
                self.command.program, e
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| OrchestratorError::SpawnFailed("Failed to capture stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| OrchestratorError::SpawnFailed("Failed to capture stdout".into()))?;
        let stderr = child.stderr.take();

        let mut writer = FramedWrite::new(stdin, LinesCodec::new());
        writer
            .send(serde_json::to_string(&payload)?)
            .await
            .map_err(|e| OrchestratorError::SpawnFailed(format!("Failed to send payload: {}", e)))?;

        info!("Worker process started for unit {} (pid: {:?})", unit_id, child.id());

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (outbox_tx, mut outbox_rx) = mpsc::unbounded_channel::<CoordinatorMessage>();
        let cancel = CancellationToken::new();

        let writer_id = unit_id.clone();
        let writer_task = tokio::spawn(async move {
            while let Some(message) = outbox_rx.recv().await {
                let line = match serde_json::to_string(&message) {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("Failed to encode message for unit {}: {}", writer_id, e);
                        continue;
                    }
                };
                if let Err(e) = writer.send(line).await {
                    debug!("Unit {} stdin closed: {}", writer_id, e);
                    break;
                }
            }
        });

        if let Some(stderr) = stderr {
            let stderr_id = unit_id.clone();
            tokio::spawn(async move {
                let mut lines = FramedRead::new(stderr, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
                while let Some(Ok(line)) = lines.next().await {
                    debug!("[unit {}] {}", stderr_id, line);
                }
            });
        }

        let token = cancel.clone();
        let grace = self.command.terminate_grace;
        let id = unit_id.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    terminate(&mut child, grace, &id).await;
                }
                _ = pump_stdout(stdout, &event_tx, &id) => {
                    tokio::select! {
                        _ = token.cancelled() => {
                            terminate(&mut child, grace, &id).await;
                        }
                        status = child.wait() => {
                            let code = match status {
                                Ok(status) => status.code(),
                                Err(e) => {
                                    warn!("Failed to wait for unit {}: {}", id, e);
                                    None
                                }
                            };
                            debug!("Unit {} exited with code {:?}", id, code);
                            let _ = event_tx.send(UnitEvent::Exited(code));
                        }
                    }
                }
            }
            writer_task.abort();
        });

        Ok(SpawnedUnit {
            handle: UnitHandle::new(unit_id, outbox_tx, cancel),
            events: event_rx,
        })
    }
}

/// Forward stdout lines as unit events until EOF.
///
/// Lines that are not protocol messages are logged and skipped.
async fn pump_stdout(stdout: ChildStdout, events: &mpsc::UnboundedSender<UnitEvent>, id: &str) {
    let mut lines = FramedRead::new(stdout, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));

    while let Some(line) = lines.next().await {
        match line {
            Ok(line) if line.trim().is_empty() => {}
            Ok(line) => match serde_json::from_str::<UnitMessage>(&line) {
                Ok(message) => {
                    if events.send(UnitEvent::Message(message)).is_err() {
                        return;
                    }
                }
                Err(e) => warn!("Unit {} wrote a non-protocol line ({}): {}", id, e, line),
            },
            Err(e) => {
                let _ = events.send(UnitEvent::Failed(format!("Failed to read output: {}", e)));
                return;
            }
        }
    }
}

/// SIGTERM, wait up to `grace`, then SIGKILL
async fn terminate(child: &mut Child, grace: Duration, id: &str) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        debug!("Sending SIGTERM to unit {} (pid {})", id, pid);
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            debug!("SIGTERM to unit {} failed: {}", id, e);
        }

        if let Ok(Ok(status)) = tokio::time::timeout(grace, child.wait()).await {
            debug!("Unit {} stopped: {}", id, status);
            return;
        }
    }

    #[cfg(not(unix))]
    let _ = grace;

    debug!("Killing unit {}", id);
    if let Err(e) = child.kill().await {
        warn!("Failed to kill unit {}: {}", id, e);
    }
}
