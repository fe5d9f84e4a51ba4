// src/queue/sqlite.rs
//! SQLite task repository
//!
//! Two tables: `tasks` and `task_dependencies`. Timestamps are stored as
//! Unix milliseconds, enums as their snake_case names.

use crate::domain::task::{Task, TaskPriority, TaskStatus, TaskType};
use crate::queue::repository::{TaskPage, TaskRepository};
use crate::utils::errors::{OrchestratorError, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, ToSql};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

const TASK_COLUMNS: &str = "id, project_id, assigned_agent_id, title, description, status, \
     priority, task_type, parent_task_id, progress_percentage, estimated_hours, actual_hours, \
     due_date, started_at, completed_at, created_at, updated_at";

const PRIORITY_RANK: &str = "CASE priority WHEN 'critical' THEN 0 WHEN 'high' THEN 1 \
     WHEN 'medium' THEN 2 ELSE 3 END";

pub struct SqliteTaskRepository {
    db: Arc<Mutex<Connection>>,
}

impl SqliteTaskRepository {
    /// Open (or create) the database file at `path`
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                OrchestratorError::Storage(format!("Failed to create directory: {}", e))
            })?;
        }

        let conn = Connection::open(path)
            .map_err(|e| OrchestratorError::Storage(format!("Failed to open database: {}", e)))?;
        let repo = Self::from_connection(conn).await?;

        info!("Task storage initialized at {:?}", path);
        Ok(repo)
    }

    /// Private in-memory database
    pub async fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn).await
    }

    async fn from_connection(conn: Connection) -> Result<Self> {
        let repo = Self {
            db: Arc::new(Mutex::new(conn)),
        };
        repo.init_schema().await?;
        Ok(repo)
    }

    async fn init_schema(&self) -> Result<()> {
        let db = self.db.lock().await;

        db.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL,
                assigned_agent_id TEXT,
                title TEXT NOT NULL,
                description TEXT,
                status TEXT NOT NULL,
                priority TEXT NOT NULL,
                task_type TEXT NOT NULL,
                parent_task_id TEXT,
                progress_percentage INTEGER NOT NULL DEFAULT 0,
                estimated_hours REAL,
                actual_hours REAL,
                due_date INTEGER,
                started_at INTEGER,
                completed_at INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_tasks_queue ON tasks(status, assigned_agent_id);
            CREATE INDEX IF NOT EXISTS idx_tasks_project ON tasks(project_id);

            CREATE TABLE IF NOT EXISTS task_dependencies (
                task_id TEXT NOT NULL,
                depends_on_task_id TEXT NOT NULL,
                PRIMARY KEY (task_id, depends_on_task_id)
            );
            "#,
        )
        .map_err(|e| OrchestratorError::Storage(format!("Schema creation failed: {}", e)))?;

        Ok(())
    }
}

/// Raw column values; enum and timestamp decoding happens outside the
/// rusqlite row callback so bad values surface as storage errors.
struct StoredTask {
    id: String,
    project_id: String,
    assigned_agent_id: Option<String>,
    title: String,
    description: Option<String>,
    status: String,
    priority: String,
    task_type: String,
    parent_task_id: Option<String>,
    progress_percentage: i64,
    estimated_hours: Option<f64>,
    actual_hours: Option<f64>,
    due_date: Option<i64>,
    started_at: Option<i64>,
    completed_at: Option<i64>,
    created_at: i64,
    updated_at: i64,
}

impl StoredTask {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            project_id: row.get(1)?,
            assigned_agent_id: row.get(2)?,
            title: row.get(3)?,
            description: row.get(4)?,
            status: row.get(5)?,
            priority: row.get(6)?,
            task_type: row.get(7)?,
            parent_task_id: row.get(8)?,
            progress_percentage: row.get(9)?,
            estimated_hours: row.get(10)?,
            actual_hours: row.get(11)?,
            due_date: row.get(12)?,
            started_at: row.get(13)?,
            completed_at: row.get(14)?,
            created_at: row.get(15)?,
            updated_at: row.get(16)?,
        })
    }

    fn into_task(self) -> Result<Task> {
        let bad = |column: &str, value: &str| {
            OrchestratorError::Storage(format!(
                "Invalid {} '{}' for task {}",
                column, value, self.id
            ))
        };

        let status = TaskStatus::parse(&self.status).ok_or_else(|| bad("status", &self.status))?;
        let priority =
            TaskPriority::parse(&self.priority).ok_or_else(|| bad("priority", &self.priority))?;
        let task_type =
            TaskType::parse(&self.task_type).ok_or_else(|| bad("task_type", &self.task_type))?;
        let progress_percentage = u8::try_from(self.progress_percentage)
            .ok()
            .filter(|p| *p <= 100)
            .ok_or_else(|| bad("progress_percentage", &self.progress_percentage.to_string()))?;

        Ok(Task {
            id: self.id,
            project_id: self.project_id,
            assigned_agent_id: self.assigned_agent_id,
            title: self.title,
            description: self.description,
            status,
            priority,
            task_type,
            parent_task_id: self.parent_task_id,
            progress_percentage,
            estimated_hours: self.estimated_hours,
            actual_hours: self.actual_hours,
            due_date: self.due_date.map(from_millis).transpose()?,
            started_at: self.started_at.map(from_millis).transpose()?,
            completed_at: self.completed_at.map(from_millis).transpose()?,
            created_at: from_millis(self.created_at)?,
            updated_at: from_millis(self.updated_at)?,
        })
    }
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| OrchestratorError::Storage(format!("Invalid timestamp {}", ms)))
}

fn to_millis(ts: &DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn query_tasks(conn: &Connection, sql: &str, params: &[&dyn ToSql]) -> Result<Vec<Task>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, StoredTask::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.into_iter().map(StoredTask::into_task).collect()
}

fn count_where(conn: &Connection, sql: &str, params: &[&dyn ToSql]) -> Result<i64> {
    Ok(conn.query_row(sql, params, |row| row.get(0))?)
}

#[async_trait]
impl TaskRepository for SqliteTaskRepository {
    async fn save(&self, task: &Task) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            &format!(
                "INSERT OR REPLACE INTO tasks ({}) VALUES \
                 (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
                TASK_COLUMNS
            ),
            params![
                task.id,
                task.project_id,
                task.assigned_agent_id,
                task.title,
                task.description,
                task.status.as_str(),
                task.priority.as_str(),
                task.task_type.as_str(),
                task.parent_task_id,
                task.progress_percentage as i64,
                task.estimated_hours,
                task.actual_hours,
                task.due_date.as_ref().map(to_millis),
                task.started_at.as_ref().map(to_millis),
                task.completed_at.as_ref().map(to_millis),
                to_millis(&task.created_at),
                to_millis(&task.updated_at),
            ],
        )?;

        debug!("Saved task {} ({})", task.id, task.status);
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Task>> {
        let db = self.db.lock().await;
        let stored = db
            .query_row(
                &format!("SELECT {} FROM tasks WHERE id = ?1", TASK_COLUMNS),
                params![id],
                StoredTask::from_row,
            )
            .optional()?;
        stored.map(StoredTask::into_task).transpose()
    }

    async fn find_by_project_id(&self, project_id: &str) -> Result<Vec<Task>> {
        let db = self.db.lock().await;
        query_tasks(
            &db,
            &format!(
                "SELECT {} FROM tasks WHERE project_id = ?1 ORDER BY created_at DESC, id DESC",
                TASK_COLUMNS
            ),
            &[&project_id],
        )
    }

    async fn find_by_agent_id(&self, agent_id: &str) -> Result<Vec<Task>> {
        let db = self.db.lock().await;
        query_tasks(
            &db,
            &format!(
                "SELECT {} FROM tasks WHERE assigned_agent_id = ?1 ORDER BY created_at DESC, id DESC",
                TASK_COLUMNS
            ),
            &[&agent_id],
        )
    }

    async fn get_next_task_in_queue(&self, agent_id: Option<&str>) -> Result<Option<Task>> {
        let order = format!("ORDER BY {} ASC, created_at ASC, id ASC LIMIT 1", PRIORITY_RANK);
        let db = self.db.lock().await;
        let tasks = match agent_id {
            Some(agent_id) => query_tasks(
                &db,
                &format!(
                    "SELECT {} FROM tasks WHERE status = 'pending' AND assigned_agent_id = ?1 {}",
                    TASK_COLUMNS, order
                ),
                &[&agent_id],
            )?,
            None => query_tasks(
                &db,
                &format!(
                    "SELECT {} FROM tasks WHERE status = 'pending' {}",
                    TASK_COLUMNS, order
                ),
                &[],
            )?,
        };
        Ok(tasks.into_iter().next())
    }

    async fn find_by_status(&self, status: TaskStatus) -> Result<Vec<Task>> {
        let db = self.db.lock().await;
        query_tasks(
            &db,
            &format!(
                "SELECT {} FROM tasks WHERE status = ?1 ORDER BY created_at DESC, id DESC",
                TASK_COLUMNS
            ),
            &[&status.as_str()],
        )
    }

    async fn find_by_priority(&self, priority: TaskPriority) -> Result<Vec<Task>> {
        let db = self.db.lock().await;
        query_tasks(
            &db,
            &format!(
                "SELECT {} FROM tasks WHERE priority = ?1 ORDER BY created_at DESC, id DESC",
                TASK_COLUMNS
            ),
            &[&priority.as_str()],
        )
    }

    async fn find_all(&self, page: usize, limit: usize) -> Result<TaskPage> {
        let page = page.max(1);
        let offset = ((page - 1).saturating_mul(limit)) as i64;
        let db = self.db.lock().await;

        let total = count_where(&db, "SELECT COUNT(*) FROM tasks", &[])?;
        let tasks = query_tasks(
            &db,
            &format!(
                "SELECT {} FROM tasks ORDER BY created_at DESC, id DESC LIMIT ?1 OFFSET ?2",
                TASK_COLUMNS
            ),
            &[&(limit as i64), &offset],
        )?;

        Ok(TaskPage {
            tasks,
            total: total as usize,
            page,
            limit,
        })
    }

    async fn update(&self, task: &Task) -> Result<()> {
        self.save(task).await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut db = self.db.lock().await;
        let tx = db.transaction()?;
        tx.execute(
            "DELETE FROM task_dependencies WHERE task_id = ?1 OR depends_on_task_id = ?1",
            params![id],
        )?;
        tx.execute("DELETE FROM tasks WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(())
    }

    async fn find_subtasks(&self, parent_task_id: &str) -> Result<Vec<Task>> {
        let db = self.db.lock().await;
        query_tasks(
            &db,
            &format!(
                "SELECT {} FROM tasks WHERE parent_task_id = ?1 ORDER BY created_at DESC, id DESC",
                TASK_COLUMNS
            ),
            &[&parent_task_id],
        )
    }

    async fn find_task_dependencies(&self, task_id: &str) -> Result<Vec<Task>> {
        let columns = TASK_COLUMNS
            .split(", ")
            .map(|c| format!("t.{}", c))
            .collect::<Vec<_>>()
            .join(", ");
        let db = self.db.lock().await;
        query_tasks(
            &db,
            &format!(
                "SELECT {} FROM task_dependencies d \
                 INNER JOIN tasks t ON d.depends_on_task_id = t.id \
                 WHERE d.task_id = ?1",
                columns
            ),
            &[&task_id],
        )
    }

    async fn can_task_be_started(&self, task_id: &str) -> Result<bool> {
        let db = self.db.lock().await;
        let completed = count_where(
            &db,
            "SELECT COUNT(*) FROM task_dependencies d \
             INNER JOIN tasks t ON d.depends_on_task_id = t.id \
             WHERE d.task_id = ?1 AND t.status = 'completed'",
            &[&task_id],
        )?;
        let total = count_where(
            &db,
            "SELECT COUNT(*) FROM task_dependencies WHERE task_id = ?1",
            &[&task_id],
        )?;
        Ok(completed == total)
    }

    async fn count_tasks_by_status(&self, project_id: &str) -> Result<HashMap<TaskStatus, usize>> {
        let db = self.db.lock().await;
        let mut stmt =
            db.prepare("SELECT status, COUNT(*) FROM tasks WHERE project_id = ?1 GROUP BY status")?;
        let rows = stmt
            .query_map(params![project_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut counts = HashMap::new();
        for (status, count) in rows {
            let status = TaskStatus::parse(&status).ok_or_else(|| {
                OrchestratorError::Storage(format!("Invalid status '{}'", status))
            })?;
            counts.insert(status, count as usize);
        }
        Ok(counts)
    }

    async fn add_dependency(&self, task_id: &str, depends_on: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT OR IGNORE INTO task_dependencies (task_id, depends_on_task_id) VALUES (?1, ?2)",
            params![task_id, depends_on],
        )?;
        Ok(())
    }
}
