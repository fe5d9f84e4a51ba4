// src/queue/service.rs
//! Task queue service
//!
//! Drives task lifecycle transitions through the persistence port and
//! announces each one on the event bus. Events for one task are published
//! in transition order because each publish follows its persisted update.

use crate::domain::task::{Task, TaskStatus};
use crate::events::{EventBus, EventPayload};
use crate::observability::metric_names;
use crate::queue::repository::TaskRepository;
use crate::utils::errors::{OrchestratorError, Result};
use chrono::Utc;
use metrics::counter;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Clone)]
pub struct TaskQueueService {
    repository: Arc<dyn TaskRepository>,
    bus: EventBus,
}

impl TaskQueueService {
    pub fn new(repository: Arc<dyn TaskRepository>, bus: EventBus) -> Self {
        Self { repository, bus }
    }

    pub fn repository(&self) -> &Arc<dyn TaskRepository> {
        &self.repository
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Persist a pending task and publish `task.enqueued`
    pub async fn enqueue_task(&self, task: &Task) -> Result<()> {
        if task.status != TaskStatus::Pending {
            return Err(OrchestratorError::InvalidTransition {
                task_id: task.id.clone(),
                from: task.status,
                action: "enqueue",
            });
        }

        self.repository.save(task).await.map_err(|e| {
            error!("Failed to enqueue task {}: {}", task.id, e);
            e
        })?;

        info!(
            "Task enqueued: {} '{}' (priority: {}, agent: {:?})",
            task.id, task.title, task.priority, task.assigned_agent_id
        );
        counter!(metric_names::TASKS_ENQUEUED).increment(1);

        self.bus.publish(EventPayload::TaskEnqueued {
            task_id: task.id.clone(),
            agent_id: task.assigned_agent_id.clone(),
            priority: task.priority,
            title: task.title.clone(),
        });

        Ok(())
    }

    /// Start the head of the pending queue.
    ///
    /// Returns `None` when the queue is empty or when the head task still
    /// has unfinished dependencies. A blocked head is not skipped.
    pub async fn dequeue_next_task(&self, agent_id: Option<&str>) -> Result<Option<Task>> {
        let Some(mut task) = self.repository.get_next_task_in_queue(agent_id).await? else {
            return Ok(None);
        };

        if !self.repository.can_task_be_started(&task.id).await? {
            debug!(
                "Task {} has pending dependencies, not dequeued (agent: {:?})",
                task.id, agent_id
            );
            return Ok(None);
        }

        task.mark_as_in_progress()?;
        self.repository.update(&task).await.map_err(|e| {
            error!("Failed to dequeue task {}: {}", task.id, e);
            e
        })?;

        info!(
            "Task dequeued and started: {} '{}' (agent: {:?})",
            task.id, task.title, agent_id
        );
        counter!(metric_names::TASKS_STARTED).increment(1);

        self.bus.publish(EventPayload::TaskStarted {
            task_id: task.id.clone(),
            agent_id: agent_id.map(str::to_string),
            title: task.title.clone(),
        });

        Ok(Some(task))
    }

    pub async fn complete_task(&self, task_id: &str) -> Result<Task> {
        let mut task = self.find(task_id).await?;
        task.mark_as_completed()?;
        self.repository.update(&task).await?;

        info!("Task completed: {} '{}'", task.id, task.title);
        counter!(metric_names::TASKS_COMPLETED).increment(1);

        self.bus.publish(EventPayload::TaskCompleted {
            task_id: task.id.clone(),
            agent_id: task.assigned_agent_id.clone(),
            title: task.title.clone(),
        });

        Ok(task)
    }

    pub async fn fail_task(&self, task_id: &str, message: &str) -> Result<Task> {
        let mut task = self.find(task_id).await?;
        task.mark_as_failed()?;
        self.repository.update(&task).await?;

        error!("Task failed: {} '{}': {}", task.id, task.title, message);
        counter!(metric_names::TASKS_FAILED).increment(1);

        self.bus.publish(EventPayload::TaskFailed {
            task_id: task.id.clone(),
            agent_id: task.assigned_agent_id.clone(),
            title: task.title.clone(),
            error: message.to_string(),
        });

        Ok(task)
    }

    /// Marks the task cancelled. A unit already running it is not signalled.
    pub async fn cancel_task(&self, task_id: &str) -> Result<Task> {
        let mut task = self.find(task_id).await?;
        task.cancel()?;
        self.repository.update(&task).await?;

        info!("Task cancelled: {} '{}'", task.id, task.title);
        counter!(metric_names::TASKS_CANCELLED).increment(1);

        self.bus.publish(EventPayload::TaskCancelled {
            task_id: task.id.clone(),
            agent_id: task.assigned_agent_id.clone(),
            title: task.title.clone(),
        });

        Ok(task)
    }

    /// Put a failed task back in the queue
    pub async fn retry_failed_task(&self, task_id: &str) -> Result<Task> {
        let mut task = self.find(task_id).await?;
        task.reset_for_retry()?;
        self.repository.update(&task).await?;

        info!("Failed task retried: {} '{}'", task.id, task.title);
        counter!(metric_names::TASKS_RETRIED).increment(1);

        self.bus.publish(EventPayload::TaskRetried {
            task_id: task.id.clone(),
            agent_id: task.assigned_agent_id.clone(),
            title: task.title.clone(),
        });

        Ok(task)
    }

    /// Store `agent_id` as the assignee of a persisted task. Unknown tasks
    /// are left alone.
    pub async fn record_assignment(&self, task_id: &str, agent_id: &str) -> Result<Option<Task>> {
        let Some(mut task) = self.repository.find_by_id(task_id).await? else {
            return Ok(None);
        };

        if task.assigned_agent_id.as_deref() != Some(agent_id) {
            task.assigned_agent_id = Some(agent_id.to_string());
            task.updated_at = Utc::now();
            self.repository.update(&task).await?;
            debug!("Task {} assigned to agent {}", task.id, agent_id);
        }

        Ok(Some(task))
    }

    pub async fn get_task_status(&self, task_id: &str) -> Result<Option<Task>> {
        self.repository.find_by_id(task_id).await
    }

    /// Pending tasks, optionally only those assigned to `agent_id`
    pub async fn get_queued_tasks_count(&self, agent_id: Option<&str>) -> Result<usize> {
        let pending = self.repository.find_by_status(TaskStatus::Pending).await?;
        Ok(match agent_id {
            Some(agent_id) => pending
                .iter()
                .filter(|t| t.assigned_agent_id.as_deref() == Some(agent_id))
                .count(),
            None => pending.len(),
        })
    }

    async fn find(&self, task_id: &str) -> Result<Task> {
        match self.repository.find_by_id(task_id).await? {
            Some(task) => Ok(task),
            None => {
                warn!("Task not found: {}", task_id);
                Err(OrchestratorError::TaskNotFound(task_id.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::task::TaskPriority;
    use crate::events::{EventJournal, Topic};
    use crate::queue::memory::InMemoryTaskRepository;
    use chrono::{Duration, Utc};

    fn service() -> (TaskQueueService, EventJournal) {
        let bus = EventBus::new();
        let journal = EventJournal::attach(&bus, 64);
        let repo = Arc::new(InMemoryTaskRepository::new());
        (TaskQueueService::new(repo, bus), journal)
    }

    fn topics(journal: &EventJournal) -> Vec<Topic> {
        journal.drain().into_iter().map(|e| e.topic).collect()
    }

    #[tokio::test]
    async fn test_enqueue_publishes() {
        let (queue, journal) = service();
        let task = Task::new("p", "t").assigned_to("a1");

        queue.enqueue_task(&task).await.unwrap();

        let events = journal.drain();
        assert_eq!(events.len(), 1);
        match &events[0].payload {
            EventPayload::TaskEnqueued {
                task_id, agent_id, ..
            } => {
                assert_eq!(task_id, &task.id);
                assert_eq!(agent_id.as_deref(), Some("a1"));
            }
            other => panic!("unexpected payload {:?}", other),
        }
        assert_eq!(queue.get_queued_tasks_count(Some("a1")).await.unwrap(), 1);
        assert_eq!(queue.get_queued_tasks_count(Some("a2")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_enqueue_rejects_started_task() {
        let (queue, _journal) = service();
        let mut task = Task::new("p", "t");
        task.mark_as_in_progress().unwrap();

        assert!(queue.enqueue_task(&task).await.unwrap_err().is_validation());
    }

    #[tokio::test]
    async fn test_dequeue_priority_beats_age() {
        let (queue, _journal) = service();
        let t0 = Utc::now();
        let b = Task::new("p", "B")
            .assigned_to("a1")
            .with_priority(TaskPriority::High)
            .with_created_at(t0);
        let a = Task::new("p", "A")
            .assigned_to("a1")
            .with_priority(TaskPriority::Critical)
            .with_created_at(t0 + Duration::seconds(1));

        queue.enqueue_task(&b).await.unwrap();
        queue.enqueue_task(&a).await.unwrap();

        let next = queue.dequeue_next_task(Some("a1")).await.unwrap().unwrap();
        assert_eq!(next.id, a.id);
        assert_eq!(next.status, TaskStatus::InProgress);
        assert!(next.started_at.is_some());
    }

    #[tokio::test]
    async fn test_blocked_head_returns_none() {
        let (queue, _journal) = service();
        let t0 = Utc::now();
        let dep = Task::new("p", "dep")
            .with_priority(TaskPriority::Low)
            .with_created_at(t0);
        let head = Task::new("p", "head")
            .with_priority(TaskPriority::Critical)
            .with_created_at(t0);

        queue.enqueue_task(&dep).await.unwrap();
        queue.enqueue_task(&head).await.unwrap();
        queue
            .repository()
            .add_dependency(&head.id, &dep.id)
            .await
            .unwrap();

        assert!(queue.dequeue_next_task(None).await.unwrap().is_none());
        let stored = queue.get_task_status(&head.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn test_full_lifecycle_event_order() {
        let (queue, journal) = service();
        let task = Task::new("p", "t");

        queue.enqueue_task(&task).await.unwrap();
        queue.dequeue_next_task(None).await.unwrap().unwrap();
        queue.fail_task(&task.id, "boom").await.unwrap();
        queue.retry_failed_task(&task.id).await.unwrap();
        queue.dequeue_next_task(None).await.unwrap().unwrap();
        let done = queue.complete_task(&task.id).await.unwrap();

        assert_eq!(done.progress_percentage, 100);
        assert!(done.completed_at.is_some());
        assert_eq!(
            topics(&journal),
            vec![
                Topic::TaskEnqueued,
                Topic::TaskStarted,
                Topic::TaskFailed,
                Topic::TaskRetried,
                Topic::TaskStarted,
                Topic::TaskCompleted,
            ]
        );
    }

    #[tokio::test]
    async fn test_complete_requires_in_progress() {
        let (queue, journal) = service();
        let task = Task::new("p", "t");
        queue.enqueue_task(&task).await.unwrap();
        journal.drain();

        let err = queue.complete_task(&task.id).await.unwrap_err();
        assert!(err.is_validation());
        assert!(journal.is_empty());
    }

    #[tokio::test]
    async fn test_retry_requires_failed() {
        let (queue, _journal) = service();
        let task = Task::new("p", "t");
        queue.enqueue_task(&task).await.unwrap();

        assert!(queue.retry_failed_task(&task.id).await.unwrap_err().is_validation());
    }

    #[tokio::test]
    async fn test_unknown_task() {
        let (queue, _journal) = service();

        assert!(queue.complete_task("nope").await.unwrap_err().is_not_found());
        assert!(queue.cancel_task("nope").await.unwrap_err().is_not_found());
        assert!(queue.get_task_status("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cancel_pending() {
        let (queue, journal) = service();
        let task = Task::new("p", "t");
        queue.enqueue_task(&task).await.unwrap();

        let cancelled = queue.cancel_task(&task.id).await.unwrap();
        assert_eq!(cancelled.status, TaskStatus::Cancelled);
        assert_eq!(topics(&journal), vec![Topic::TaskEnqueued, Topic::TaskCancelled]);
        assert_eq!(queue.get_queued_tasks_count(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_recorded_assignee_reaches_completion_event() {
        let (queue, journal) = service();
        let task = Task::new("p", "unassigned");
        queue.enqueue_task(&task).await.unwrap();
        let task = queue.dequeue_next_task(None).await.unwrap().unwrap();
        assert!(task.assigned_agent_id.is_none());

        let stored = queue.record_assignment(&task.id, "a1").await.unwrap().unwrap();
        assert_eq!(stored.assigned_agent_id.as_deref(), Some("a1"));
        assert!(queue.record_assignment("missing", "a1").await.unwrap().is_none());

        queue.complete_task(&task.id).await.unwrap();
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
