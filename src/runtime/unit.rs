// src/runtime/unit.rs
//! Isolated execution units
//!
//! A unit is spawned from a [`WorkerPayload`], reports back through a typed
//! event stream and can be forcibly terminated through its handle. No
//! memory is shared between coordinator and unit.

use crate::runtime::protocol::{CoordinatorMessage, UnitMessage, WorkerPayload};
use crate::utils::errors::{OrchestratorError, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// What the coordinator observes from a unit
#[derive(Debug, Clone, PartialEq)]
pub enum UnitEvent {
    Message(UnitMessage),

    /// The unit failed outside the message protocol (crash, bad output)
    Failed(String),

    /// The unit is gone. `None` when no exit code is available.
    Exited(Option<i32>),
}

/// Owning handle to a live unit.
///
/// Dropping the handle terminates the unit, so a handle can never leak a
/// running unit.
#[derive(Debug)]
pub struct UnitHandle {
    id: String,
    outbox: mpsc::UnboundedSender<CoordinatorMessage>,
    cancel: CancellationToken,
}

impl UnitHandle {
    pub fn new(
        id: impl Into<String>,
        outbox: mpsc::UnboundedSender<CoordinatorMessage>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id: id.into(),
            outbox,
            cancel,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Deliver a message to the unit
    pub fn send(&self, message: CoordinatorMessage) -> Result<()> {
        self.outbox.send(message).map_err(|_| {
            OrchestratorError::Execution(format!("Execution unit {} is no longer running", self.id))
        })
    }

    /// Sender half for replying from a detached task
    pub fn outbox(&self) -> mpsc::UnboundedSender<CoordinatorMessage> {
        self.outbox.clone()
    }

    pub fn is_terminated(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Forcibly stop the unit
    pub fn terminate(self) {
        debug!("Terminating execution unit {}", self.id);
        self.cancel.cancel();
    }
}

impl Drop for UnitHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// A freshly spawned unit: its handle plus the stream of its events
#[derive(Debug)]
pub struct SpawnedUnit {
    pub handle: UnitHandle,
    pub events: mpsc::UnboundedReceiver<UnitEvent>,
}

/// Creates execution units
#[async_trait]
pub trait UnitSpawner: Send + Sync {
    async fn spawn(&self, payload: WorkerPayload) -> Result<SpawnedUnit>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drop_cancels() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        let handle = UnitHandle::new("u1", tx, token.clone());

        assert!(!handle.is_terminated());
        drop(handle);
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_send_after_unit_gone() {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = UnitHandle::new("u1", tx, CancellationToken::new());
        drop(rx);

        let err = handle
            .send(CoordinatorMessage::ToolResponse {
                id: "1".into(),
                result: serde_json::Value::Null,
            })
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Execution(_)));
    }
}
