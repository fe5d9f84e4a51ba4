// src/queue/memory.rs
//! In-memory task repository

use crate::domain::task::{Task, TaskPriority, TaskStatus};
use crate::queue::repository::{newest_first, queue_order, TaskPage, TaskRepository};
use crate::utils::errors::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};

/// Concurrent map-backed repository. Suitable for tests and single-process
/// deployments without durability requirements.
#[derive(Default)]
pub struct InMemoryTaskRepository {
    tasks: DashMap<String, Task>,

    /// task id -> ids it depends on
    dependencies: DashMap<String, HashSet<String>>,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    fn collect_where<F>(&self, predicate: F) -> Vec<Task>
    where
        F: Fn(&Task) -> bool,
    {
        let mut tasks: Vec<Task> = self
            .tasks
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        tasks.sort_by(newest_first);
        tasks
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn save(&self, task: &Task) -> Result<()> {
        self.tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Task>> {
        Ok(self.tasks.get(id).map(|entry| entry.value().clone()))
    }

    async fn find_by_project_id(&self, project_id: &str) -> Result<Vec<Task>> {
        Ok(self.collect_where(|t| t.project_id == project_id))
    }

    async fn find_by_agent_id(&self, agent_id: &str) -> Result<Vec<Task>> {
        Ok(self.collect_where(|t| t.assigned_agent_id.as_deref() == Some(agent_id)))
    }

    async fn get_next_task_in_queue(&self, agent_id: Option<&str>) -> Result<Option<Task>> {
        let next = self
            .tasks
            .iter()
            .filter(|entry| {
                let task = entry.value();
                task.status == TaskStatus::Pending
                    && agent_id.map_or(true, |a| task.assigned_agent_id.as_deref() == Some(a))
            })
            .map(|entry| entry.value().clone())
            .min_by(queue_order);
        Ok(next)
    }

    async fn find_by_status(&self, status: TaskStatus) -> Result<Vec<Task>> {
        Ok(self.collect_where(|t| t.status == status))
    }

    async fn find_by_priority(&self, priority: TaskPriority) -> Result<Vec<Task>> {
        Ok(self.collect_where(|t| t.priority == priority))
    }

    async fn find_all(&self, page: usize, limit: usize) -> Result<TaskPage> {
        let page = page.max(1);
        let all = self.collect_where(|_| true);
        let total = all.len();
        let tasks = all
            .into_iter()
            .skip((page - 1).saturating_mul(limit))
            .take(limit)
            .collect();

        Ok(TaskPage {
            tasks,
            total,
            page,
            limit,
        })
    }

    async fn update(&self, task: &Task) -> Result<()> {
        self.save(task).await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.tasks.remove(id);
        self.dependencies.remove(id);
        for mut entry in self.dependencies.iter_mut() {
            entry.value_mut().remove(id);
        }
        Ok(())
    }

    async fn find_subtasks(&self, parent_task_id: &str) -> Result<Vec<Task>> {
        Ok(self.collect_where(|t| t.parent_task_id.as_deref() == Some(parent_task_id)))
    }

    async fn find_task_dependencies(&self, task_id: &str) -> Result<Vec<Task>> {
        let ids: Vec<String> = match self.dependencies.get(task_id) {
            Some(deps) => deps.iter().cloned().collect(),
            None => return Ok(vec![]),
        };

        Ok(ids
            .iter()
            .filter_map(|id| self.tasks.get(id).map(|entry| entry.value().clone()))
            .collect())
    }

    async fn can_task_be_started(&self, task_id: &str) -> Result<bool> {
        let ids: Vec<String> = match self.dependencies.get(task_id) {
            Some(deps) => deps.iter().cloned().collect(),
            None => return Ok(true),
        };

        Ok(ids.iter().all(|id| {
            self.tasks
                .get(id)
                .map_or(false, |entry| entry.value().status == TaskStatus::Completed)
        }))
    }

    async fn count_tasks_by_status(&self, project_id: &str) -> Result<HashMap<TaskStatus, usize>> {
        let mut counts = HashMap::new();
        for entry in self.tasks.iter() {
            let task = entry.value();
            if task.project_id == project_id {
                *counts.entry(task.status).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    async fn add_dependency(&self, task_id: &str, depends_on: &str) -> Result<()> {
        self.dependencies
            .entry(task_id.to_string())
            .or_default()
            .insert(depends_on.to_string());
        Ok(())
    }
}
