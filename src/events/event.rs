// src/events/event.rs
//! Event topics and typed payloads

use crate::domain::agent::AgentStatus;
use crate::domain::task::TaskPriority;
use crate::runtime::protocol::{LogLevel, WorkStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use ulid::Ulid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Topic {
    #[serde(rename = "task.enqueued")]
    TaskEnqueued,
    #[serde(rename = "task.started")]
    TaskStarted,
    #[serde(rename = "task.completed")]
    TaskCompleted,
    #[serde(rename = "task.failed")]
    TaskFailed,
    #[serde(rename = "task.cancelled")]
    TaskCancelled,
    #[serde(rename = "task.retried")]
    TaskRetried,
    #[serde(rename = "agent.started")]
    AgentStarted,
    #[serde(rename = "agent.stopped")]
    AgentStopped,
    #[serde(rename = "agent.task_completed")]
    AgentTaskCompleted,
    #[serde(rename = "agent.status_update")]
    AgentStatusUpdate,
    #[serde(rename = "agent.progress")]
    AgentProgress,
    #[serde(rename = "agent.log")]
    AgentLog,
    #[serde(rename = "agent.error")]
    AgentError,
}

impl Topic {
    pub const ALL: [Topic; 13] = [
        Topic::TaskEnqueued,
        Topic::TaskStarted,
        Topic::TaskCompleted,
        Topic::TaskFailed,
        Topic::TaskCancelled,
        Topic::TaskRetried,
        Topic::AgentStarted,
        Topic::AgentStopped,
        Topic::AgentTaskCompleted,
        Topic::AgentStatusUpdate,
        Topic::AgentProgress,
        Topic::AgentLog,
        Topic::AgentError,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Topic::TaskEnqueued => "task.enqueued",
            Topic::TaskStarted => "task.started",
            Topic::TaskCompleted => "task.completed",
            Topic::TaskFailed => "task.failed",
            Topic::TaskCancelled => "task.cancelled",
            Topic::TaskRetried => "task.retried",
            Topic::AgentStarted => "agent.started",
            Topic::AgentStopped => "agent.stopped",
            Topic::AgentTaskCompleted => "agent.task_completed",
            Topic::AgentStatusUpdate => "agent.status_update",
            Topic::AgentProgress => "agent.progress",
            Topic::AgentLog => "agent.log",
            Topic::AgentError => "agent.error",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of each topic. `agent_id` on task events is the task's assigned
/// agent, or the dequeuing agent for `TaskStarted`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EventPayload {
    TaskEnqueued {
        task_id: String,
        agent_id: Option<String>,
        priority: TaskPriority,
        title: String,
    },
    TaskStarted {
        task_id: String,
        agent_id: Option<String>,
        title: String,
    },
    TaskCompleted {
        task_id: String,
        agent_id: Option<String>,
        title: String,
    },
    TaskFailed {
        task_id: String,
        agent_id: Option<String>,
        title: String,
        error: String,
    },
    TaskCancelled {
        task_id: String,
        agent_id: Option<String>,
        title: String,
    },
    TaskRetried {
        task_id: String,
        agent_id: Option<String>,
        title: String,
    },
    AgentStarted {
        agent_id: String,
        worker_id: String,
        name: String,
        status: AgentStatus,
    },
    AgentStopped {
        agent_id: String,
    },
    AgentTaskCompleted {
        agent_id: String,
        task_id: String,
        result: Option<serde_json::Value>,
    },
    AgentStatusUpdate {
        agent_id: String,
        task_id: String,
        status: WorkStatus,
    },
    AgentProgress {
        agent_id: String,
        task_id: String,
        progress: f64,
        message: Option<String>,
    },
    AgentLog {
        agent_id: String,
        level: LogLevel,
        message: String,
        metadata: Option<serde_json::Value>,
    },
    AgentError {
        agent_id: String,
        error: String,
    },
}

impl EventPayload {
    pub fn topic(&self) -> Topic {
        match self {
            EventPayload::TaskEnqueued { .. } => Topic::TaskEnqueued,
            EventPayload::TaskStarted { .. } => Topic::TaskStarted,
            EventPayload::TaskCompleted { .. } => Topic::TaskCompleted,
            EventPayload::TaskFailed { .. } => Topic::TaskFailed,
            EventPayload::TaskCancelled { .. } => Topic::TaskCancelled,
            EventPayload::TaskRetried { .. } => Topic::TaskRetried,
            EventPayload::AgentStarted { .. } => Topic::AgentStarted,
            EventPayload::AgentStopped { .. } => Topic::AgentStopped,
            EventPayload::AgentTaskCompleted { .. } => Topic::AgentTaskCompleted,
            EventPayload::AgentStatusUpdate { .. } => Topic::AgentStatusUpdate,
            EventPayload::AgentProgress { .. } => Topic::AgentProgress,
            EventPayload::AgentLog { .. } => Topic::AgentLog,
            EventPayload::AgentError { .. } => Topic::AgentError,
        }
    }

    /// Task the event refers to, if any
    pub fn task_id(&self) -> Option<&str> {
        match self {
            EventPayload::TaskEnqueued { task_id, .. }
            | EventPayload::TaskStarted { task_id, .. }
            | EventPayload::TaskCompleted { task_id, .. }
            | EventPayload::TaskFailed { task_id, .. }
            | EventPayload::TaskCancelled { task_id, .. }
            | EventPayload::TaskRetried { task_id, .. }
            | EventPayload::AgentTaskCompleted { task_id, .. }
            | EventPayload::AgentStatusUpdate { task_id, .. }
            | EventPayload::AgentProgress { task_id, .. } => Some(task_id),
            _ => None,
        }
    }
}

/// Published event envelope
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub id: String,
    pub topic: Topic,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            id: Ulid::new().to_string(),
            topic: payload.topic(),
            timestamp: Utc::now(),
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_names_match_serde() {
        for topic in Topic::ALL {
            let json = serde_json::to_string(&topic).unwrap();
            assert_eq!(json, format!("\"{}\"", topic.as_str()));
        }
    }

    #[test]
    fn test_envelope_carries_topic() {
        let event = Event::new(EventPayload::AgentStopped {
            agent_id: "a1".into(),
        });
        assert_eq!(event.topic, Topic::AgentStopped);
        assert!(!event.id.is_empty());
        assert_eq!(event.payload.task_id(), None);
    }
}
