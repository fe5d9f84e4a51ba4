// src/domain/task.rs
//! Task entity and its lifecycle state machine
//!
//! ```text
//! pending ──▶ in_progress ──▶ completed
//!    │             │      └──▶ failed ──(retry)──▶ pending
//!    └─────────────┴──────────▶ cancelled
//! ```
//!
//! Dependency satisfaction is not the entity's concern; the queue checks it
//! through the repository before starting a task.

use crate::utils::errors::{OrchestratorError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 5] = [
        TaskStatus::Pending,
        TaskStatus::InProgress,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(TaskStatus::Pending),
            "in_progress" => Some(TaskStatus::InProgress),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            "cancelled" => Some(TaskStatus::Cancelled),
            _ => None,
        }
    }

    /// Completed, failed and cancelled tasks accept no further transitions
    /// (except retry of a failed task, which is an explicit reset).
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordering key for the queue: `Critical > High > Medium > Low`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl TaskPriority {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskPriority::Low => "low",
            TaskPriority::Medium => "medium",
            TaskPriority::High => "high",
            TaskPriority::Critical => "critical",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "low" => Some(TaskPriority::Low),
            "medium" => Some(TaskPriority::Medium),
            "high" => Some(TaskPriority::High),
            "critical" => Some(TaskPriority::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Feature,
    Bug,
    Refactor,
    Documentation,
    Test,
}

impl TaskType {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::Feature => "feature",
            TaskType::Bug => "bug",
            TaskType::Refactor => "refactor",
            TaskType::Documentation => "documentation",
            TaskType::Test => "test",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "feature" => Some(TaskType::Feature),
            "bug" => Some(TaskType::Bug),
            "refactor" => Some(TaskType::Refactor),
            "documentation" => Some(TaskType::Documentation),
            "test" => Some(TaskType::Test),
            _ => None,
        }
    }
}

/// One unit of work.
///
/// Fields are public so repositories can rehydrate stored rows; lifecycle
/// changes go through the guarded methods below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub project_id: String,
    pub assigned_agent_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub parent_task_id: Option<String>,
    pub progress_percentage: u8,
    pub estimated_hours: Option<f64>,
    pub actual_hours: Option<f64>,
    pub due_date: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// New pending task with medium priority
    pub fn new(project_id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Ulid::new().to_string(),
            project_id: project_id.into(),
            assigned_agent_id: None,
            title: title.into(),
            description: None,
            status: TaskStatus::Pending,
            priority: TaskPriority::Medium,
            task_type: TaskType::Feature,
            parent_task_id: None,
            progress_percentage: 0,
            estimated_hours: None,
            actual_hours: None,
            due_date: None,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_type(mut self, task_type: TaskType) -> Self {
        self.task_type = task_type;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn assigned_to(mut self, agent_id: impl Into<String>) -> Self {
        self.assigned_agent_id = Some(agent_id.into());
        self
    }

    pub fn with_parent(mut self, parent_task_id: impl Into<String>) -> Self {
        self.parent_task_id = Some(parent_task_id.into());
        self
    }

    pub fn with_estimate(mut self, hours: f64) -> Self {
        self.estimated_hours = Some(hours);
        self
    }

    pub fn with_due_date(mut self, due: DateTime<Utc>) -> Self {
        self.due_date = Some(due);
        self
    }

    /// Override creation time (imports, tests of queue ordering)
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self.updated_at = created_at;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Only pending tasks may start. Dependencies are checked by the queue.
    pub fn can_be_started(&self) -> bool {
        self.status == TaskStatus::Pending
    }

    pub fn mark_as_in_progress(&mut self) -> Result<()> {
        self.guard(self.status == TaskStatus::Pending, "start")?;
        let now = Utc::now();
        self.status = TaskStatus::InProgress;
        self.started_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    pub fn update_progress(&mut self, progress: u32) -> Result<()> {
        if progress > 100 {
            return Err(OrchestratorError::InvalidProgress(progress));
        }
        self.guard(!self.status.is_terminal(), "update progress of")?;
        self.progress_percentage = progress as u8;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn mark_as_completed(&mut self) -> Result<()> {
        self.guard(self.status == TaskStatus::InProgress, "complete")?;
        let now = Utc::now();
        self.status = TaskStatus::Completed;
        self.progress_percentage = 100;
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    pub fn mark_as_failed(&mut self) -> Result<()> {
        self.guard(self.status == TaskStatus::InProgress, "fail")?;
        self.status = TaskStatus::Failed;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<()> {
        self.guard(
            matches!(self.status, TaskStatus::Pending | TaskStatus::InProgress),
            "cancel",
        )?;
        self.status = TaskStatus::Cancelled;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Put a failed task back in the queue
    pub fn reset_for_retry(&mut self) -> Result<()> {
        self.guard(self.status == TaskStatus::Failed, "retry")?;
        self.status = TaskStatus::Pending;
        self.started_at = None;
        self.progress_percentage = 0;
        self.updated_at = Utc::now();
        Ok(())
    }

    fn guard(&self, allowed: bool, action: &'static str) -> Result<()> {
        if allowed {
            Ok(())
        } else {
            Err(OrchestratorError::InvalidTransition {
                task_id: self.id.clone(),
                from: self.status,
                action,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running_task() -> Task {
        let mut task = Task::new("p1", "Implement login");
        task.mark_as_in_progress().unwrap();
        task
    }

    #[test]
    fn test_new_task_defaults() {
        let task = Task::new("p1", "Write docs");
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.priority, TaskPriority::Medium);
        assert_eq!(task.progress_percentage, 0);
        assert!(task.started_at.is_none());
        assert!(task.completed_at.is_none());
        assert!(task.can_be_started());
    }

    #[test]
    fn test_priority_ordering() {
        assert!(TaskPriority::Critical > TaskPriority::High);
        assert!(TaskPriority::High > TaskPriority::Medium);
        assert!(TaskPriority::Medium > TaskPriority::Low);
    }

    #[test]
    fn test_start_sets_started_at() {
        let task = running_task();
        assert_eq!(task.status, TaskStatus::InProgress);
        assert!(task.started_at.is_some());
        assert!(!task.can_be_started());
    }

    #[test]
    fn test_start_only_from_pending() {
        let mut task = running_task();
        let err = task.mark_as_in_progress().unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_complete_forces_progress() {
        let mut task = running_task();
        task.update_progress(40).unwrap();
        task.mark_as_completed().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.progress_percentage, 100);
        assert!(task.completed_at.is_some());
    }

    #[test]
    fn test_complete_requires_in_progress() {
        let mut task = Task::new("p1", "t");
        assert!(task.mark_as_completed().is_err());
        assert!(task.completed_at.is_none());
    }

    #[test]
    fn test_fail_requires_in_progress() {
        let mut task = Task::new("p1", "t");
        assert!(task.mark_as_failed().is_err());

        let mut task = running_task();
        task.mark_as_failed().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.completed_at.is_none());
    }

    #[test]
    fn test_progress_bounds() {
        let mut task = running_task();
        assert!(matches!(
            task.update_progress(101),
            Err(OrchestratorError::InvalidProgress(101))
        ));
        task.update_progress(100).unwrap();
        assert_eq!(task.progress_percentage, 100);
    }

    #[test]
    fn test_progress_rejected_when_terminal() {
        let mut task = running_task();
        task.cancel().unwrap();
        assert!(task.update_progress(10).is_err());
    }

    #[test]
    fn test_cancel_transitions() {
        let mut pending = Task::new("p1", "t");
        pending.cancel().unwrap();
        assert_eq!(pending.status, TaskStatus::Cancelled);

        let mut running = running_task();
        running.cancel().unwrap();
        assert_eq!(running.status, TaskStatus::Cancelled);

        let mut done = running_task();
        done.mark_as_completed().unwrap();
        assert!(done.cancel().is_err());
    }

    #[test]
    fn test_retry_resets_failed_task() {
        let mut task = running_task();
        task.update_progress(70).unwrap();
        task.mark_as_failed().unwrap();
        task.reset_for_retry().unwrap();

        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.started_at.is_none());
        assert_eq!(task.progress_percentage, 0);
    }

    #[test]
    fn test_retry_requires_failed() {
        let mut task = running_task();
        assert!(task.reset_for_retry().is_err());
        assert_eq!(task.status, TaskStatus::InProgress);
    }

    #[test]
    fn test_status_round_trip_strings() {
        for status in TaskStatus::ALL {
            assert_eq!(TaskStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TaskStatus::parse("running"), None);
    }
}
