use async_trait::async_trait;
use sqlx::SqlitePool;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use crate::db::repository::{self, TaskRow};
use crate::models::{NewTask, Task, TaskPatch};
use crate::store::{StoreError, TaskChange, TaskStore, change_feed, new_task_id, timestamp};

pub struct SqliteTaskStore {
    db: SqlitePool,
    changes: broadcast::Sender<TaskChange>,
}

impl SqliteTaskStore {
    pub fn new(db: SqlitePool) -> Self {
        Self {
            db,
            changes: change_feed(),
        }
    }

    fn publish(&self, change: TaskChange) {
        // no receivers is fine
        let _ = self.changes.send(change);
    }
}

fn rows_into_tasks(rows: Vec<TaskRow>) -> Result<Vec<Task>, StoreError> {
    rows.into_iter().map(TaskRow::into_task).collect()
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn add(&self, task: NewTask) -> Result<Task, StoreError> {
        let task = task.normalized()?.into_task(new_task_id(), timestamp());
        let row = TaskRow::from_task(&task)?;

        repository::insert_task(&self.db, &row).await.map_err(|e| {
            error!("failed to insert task {}: {}", task.id, e);
            e
        })?;

        info!("task {} created ({})", task.id, task.task_type());
        self.publish(TaskChange::Created(task.id.clone()));
        Ok(task)
    }

    async fn get(&self, id: &str) -> Result<Option<Task>, StoreError> {
        repository::find_task_by_id(&self.db, id)
            .await?
            .map(TaskRow::into_task)
            .transpose()
    }

    async fn get_all(&self) -> Result<Vec<Task>, StoreError> {
        let tasks = rows_into_tasks(repository::fetch_tasks(&self.db).await?)?;
        debug!("fetched {} tasks", tasks.len());
        Ok(tasks)
    }

    async fn update(&self, id: &str, patch: TaskPatch) -> Result<Option<Task>, StoreError> {
        let mut current = match repository::find_task_by_id(&self.db, id).await? {
            Some(row) => row.into_task()?,
            None => {
                debug!("update skipped, task {} not found", id);
                return Ok(None);
            }
        };

        current.apply_patch(patch)?;
        current.updated_at = timestamp();

        let row = TaskRow::from_task(&current)?;
        let written = repository::update_task(&self.db, &row).await.map_err(|e| {
            error!("failed to update task {}: {}", id, e);
            e
        })?;
        if !written {
            return Ok(None);
        }

        self.publish(TaskChange::Updated(current.id.clone()));
        Ok(Some(current))
    }

    async fn remove(&self, id: &str) -> Result<bool, StoreError> {
        let removed = repository::delete_task(&self.db, id).await.map_err(|e| {
            error!("failed to delete task {}: {}", id, e);
            e
        })?;

        if removed {
            info!("task {} deleted", id);
            self.publish(TaskChange::Deleted(id.to_string()));
        }
        Ok(removed)
    }

    /// Filtered in Rust: SQLite's `LIKE` folds ASCII case only.
    async fn search(&self, query: &str) -> Result<Vec<Task>, StoreError> {
        let tasks: Vec<Task> = rows_into_tasks(repository::fetch_tasks(&self.db).await?)?
            .into_iter()
            .filter(|t| t.matches_query(query))
            .collect();
        debug!("search {:?} matched {} tasks", query, tasks.len());
        Ok(tasks)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("select 1").execute(&self.db).await?;
        Ok(())
    }

    fn changes(&self) -> Option<broadcast::Receiver<TaskChange>> {
        Some(self.changes.subscribe())
    }
}
