// src/queue/repository.rs
//! Task persistence port

use crate::domain::task::{Task, TaskPriority, TaskStatus};
use crate::utils::errors::Result;
use async_trait::async_trait;
use std::cmp::{Ordering, Reverse};
use std::collections::HashMap;

/// One page of `find_all`
#[derive(Debug, Clone)]
pub struct TaskPage {
    pub tasks: Vec<Task>,
    pub total: usize,

    /// 1-based
    pub page: usize,
    pub limit: usize,
}

/// Storage backend for tasks and their dependency edges.
///
/// `find_*` listings return newest first. `get_next_task_in_queue` returns
/// the pending task that sorts first under [`queue_order`].
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Insert or replace
    async fn save(&self, task: &Task) -> Result<()>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Task>>;

    async fn find_by_project_id(&self, project_id: &str) -> Result<Vec<Task>>;

    async fn find_by_agent_id(&self, agent_id: &str) -> Result<Vec<Task>>;

    /// Head of the pending queue, restricted to tasks assigned to `agent_id`
    /// when given. Dependencies are not considered here.
    async fn get_next_task_in_queue(&self, agent_id: Option<&str>) -> Result<Option<Task>>;

    async fn find_by_status(&self, status: TaskStatus) -> Result<Vec<Task>>;

    async fn find_by_priority(&self, priority: TaskPriority) -> Result<Vec<Task>>;

    /// `page` is 1-based; page 0 is treated as page 1
    async fn find_all(&self, page: usize, limit: usize) -> Result<TaskPage>;

    async fn update(&self, task: &Task) -> Result<()>;

    /// Deletes the task and every dependency edge touching it
    async fn delete(&self, id: &str) -> Result<()>;

    async fn find_subtasks(&self, parent_task_id: &str) -> Result<Vec<Task>>;

    /// Tasks `task_id` depends on. Edges to missing tasks are skipped.
    async fn find_task_dependencies(&self, task_id: &str) -> Result<Vec<Task>>;

    /// True iff every dependency edge of `task_id` points at a completed
    /// task. An edge to a missing task counts as unsatisfied.
    async fn can_task_be_started(&self, task_id: &str) -> Result<bool>;

    /// Counts per status within a project; absent statuses are omitted
    async fn count_tasks_by_status(&self, project_id: &str) -> Result<HashMap<TaskStatus, usize>>;

    /// Record that `task_id` cannot start before `depends_on` is completed
    async fn add_dependency(&self, task_id: &str, depends_on: &str) -> Result<()>;
}

/// Queue order: higher priority first, then earlier `created_at`, then id
pub fn queue_order(a: &Task, b: &Task) -> Ordering {
    (Reverse(a.priority), a.created_at, &a.id).cmp(&(Reverse(b.priority), b.created_at, &b.id))
}

/// Listing order: newest first
pub fn newest_first(a: &Task, b: &Task) -> Ordering {
    b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn test_queue_order_priority_then_age() {
        let t0 = Utc::now();
        let old_high = Task::new("p", "old high")
            .with_priority(TaskPriority::High)
            .with_created_at(t0);
        let new_critical = Task::new("p", "new critical")
            .with_priority(TaskPriority::Critical)
            .with_created_at(t0 + Duration::seconds(5));
        let new_high = Task::new("p", "new high")
            .with_priority(TaskPriority::High)
            .with_created_at(t0 + Duration::seconds(1));

        let mut tasks = vec![new_high.clone(), old_high.clone(), new_critical.clone()];
        tasks.sort_by(queue_order);

        let titles: Vec<_> = tasks.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["new critical", "old high", "new high"]);
    }
}
