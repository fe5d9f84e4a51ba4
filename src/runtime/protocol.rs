// src/runtime/protocol.rs
//! Messages exchanged between the coordinator and execution units
//!
//! Encoded as JSON objects tagged by `type`, one per line when carried over
//! a process's stdio:
//!
//! ```text
//! unit -> coordinator   {"type":"status","status":"executing","taskId":"01H..."}
//! coordinator -> unit   {"type":"tool_response","id":"42","result":{...}}
//! ```

use crate::domain::agent::AgentConfig;
use crate::domain::task::{Task, TaskPriority, TaskType};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Phase reported by a unit's `status` message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkStatus {
    Analyzing,
    Planning,
    Executing,
    Completed,
}

impl WorkStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkStatus::Analyzing => "analyzing",
            WorkStatus::Planning => "planning",
            WorkStatus::Executing => "executing",
            WorkStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for WorkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Unit -> coordinator. Every message counts as a heartbeat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum UnitMessage {
    Status {
        status: WorkStatus,
        task_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<serde_json::Value>,
    },
    Progress {
        task_id: String,
        progress: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Log {
        level: LogLevel,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<serde_json::Value>,
    },
    ToolCall {
        tool: String,
        #[serde(default)]
        args: serde_json::Value,
        id: String,
    },
    Error {
        error: String,
    },
}

/// Coordinator -> unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoordinatorMessage {
    ToolResponse {
        id: String,
        result: serde_json::Value,
    },
}

/// Task fields a unit needs to do its work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSummary {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub priority: TaskPriority,
}

impl From<&Task> for TaskSummary {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id.clone(),
            title: task.title.clone(),
            description: task.description.clone(),
            task_type: task.task_type,
            priority: task.priority,
        }
    }
}

/// Seed data handed to a unit when it is spawned
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerPayload {
    pub agent_id: String,
    pub agent_config: AgentConfig,
    pub task: TaskSummary,
    pub project_path: PathBuf,
    pub worktree_path: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_unit_messages() {
        let msg: UnitMessage =
            serde_json::from_str(r#"{"type":"status","status":"completed","taskId":"t1","result":{"ok":true}}"#)
                .unwrap();
        assert_eq!(
            msg,
            UnitMessage::Status {
                status: WorkStatus::Completed,
                task_id: "t1".into(),
                result: Some(json!({"ok": true})),
            }
        );

        let msg: UnitMessage = serde_json::from_str(
            r#"{"type":"tool_call","tool":"readFile","args":{"path":"x"},"id":"42"}"#,
        )
        .unwrap();
        assert!(matches!(msg, UnitMessage::ToolCall { ref id, .. } if id == "42"));

        let msg: UnitMessage =
            serde_json::from_str(r#"{"type":"progress","taskId":"t1","progress":25}"#).unwrap();
        assert!(matches!(msg, UnitMessage::Progress { progress, message: None, .. } if progress == 25.0));
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(serde_json::from_str::<UnitMessage>(r#"{"type":"dance"}"#).is_err());
    }

    #[test]
    fn test_encode_tool_response() {
        let msg = CoordinatorMessage::ToolResponse {
            id: "42".into(),
            result: json!("ok"),
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"type": "tool_response", "id": "42", "result": "ok"})
        );
    }

    #[test]
    fn test_payload_uses_camel_case() {
        let task = Task::new("p", "t");
        let payload = WorkerPayload {
            agent_id: "a1".into(),
            agent_config: AgentConfig::new("a1", "Dev"),
            task: TaskSummary::from(&task),
            project_path: PathBuf::from("/tmp/p"),
            worktree_path: PathBuf::from("/tmp/p/worktrees/x"),
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["agentId"], "a1");
        assert_eq!(value["task"]["type"], "feature");
        assert!(value.get("worktreePath").is_some());
    }
}
