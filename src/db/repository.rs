use sqlx::{FromRow, SqlitePool};
use tracing::warn;

use crate::models::{ChecklistItem, Task, TaskKind, TaskType, parse_due_date};
use crate::store::StoreError;

const TASK_COLUMNS: &str =
    "id, title, description, completed, task_type, due_date, items, created_at, updated_at";

/// One row of the `tasks` table.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct TaskRow {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub completed: bool,
    pub task_type: String,
    pub due_date: Option<String>,
    pub items: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl TaskRow {
    pub fn from_task(task: &Task) -> Result<Self, StoreError> {
        let (due_date, items) = match &task.kind {
            TaskKind::Basic => (None, None),
            TaskKind::Timed { due_date } => (due_date.map(|d| d.to_rfc3339()), None),
            TaskKind::Checklist { items } => {
                let json = serde_json::to_string(items).map_err(|e| StoreError::Corrupt {
                    id: task.id.clone(),
                    reason: format!("items not serializable: {}", e),
                })?;
                (None, Some(json))
            }
        };

        Ok(Self {
            id: task.id.clone(),
            title: task.title.clone(),
            description: task.description.clone(),
            completed: task.completed,
            task_type: task.task_type().as_str().to_string(),
            due_date,
            items,
            created_at: task.created_at.clone(),
            updated_at: task.updated_at.clone(),
        })
    }

    pub fn into_task(self) -> Result<Task, StoreError> {
        let task_type: TaskType = self.task_type.parse().map_err(|reason| StoreError::Corrupt {
            id: self.id.clone(),
            reason,
        })?;

        let kind = match task_type {
            TaskType::Basic => TaskKind::Basic,
            TaskType::Timed => {
                let due_date = self.due_date.as_deref().and_then(|raw| {
                    let parsed = parse_due_date(raw);
                    if parsed.is_none() {
                        warn!("task {} has unreadable due_date {:?}", self.id, raw);
                    }
                    parsed
                });
                TaskKind::Timed { due_date }
            }
            TaskType::Checklist => {
                let items = match self.items.as_deref() {
                    Some(raw) => serde_json::from_str::<Vec<ChecklistItem>>(raw).map_err(|e| {
                        StoreError::Corrupt {
                            id: self.id.clone(),
                            reason: format!("items column: {}", e),
                        }
                    })?,
                    None => Vec::new(),
                };
                TaskKind::Checklist { items }
            }
        };

        Ok(Task {
            id: self.id,
            title: self.title,
            description: self.description,
            completed: self.completed,
            kind,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Newest first; ids are time-ordered.
pub async fn fetch_tasks(db: &SqlitePool) -> Result<Vec<TaskRow>, sqlx::Error> {
    sqlx::query_as::<_, TaskRow>(&format!(
        "SELECT {} FROM tasks ORDER BY id DESC",
        TASK_COLUMNS
    ))
    .fetch_all(db)
    .await
}

pub async fn find_task_by_id(db: &SqlitePool, id: &str) -> Result<Option<TaskRow>, sqlx::Error> {
    sqlx::query_as::<_, TaskRow>(&format!("SELECT {} FROM tasks WHERE id = ?1", TASK_COLUMNS))
        .bind(id)
        .fetch_optional(db)
        .await
}

pub async fn insert_task(db: &SqlitePool, row: &TaskRow) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO tasks
            (id, title, description, completed, task_type,
            due_date, items, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
    )
    .bind(&row.id)
    .bind(&row.title)
    .bind(&row.description)
    .bind(row.completed)
    .bind(&row.task_type)
    .bind(&row.due_date)
    .bind(&row.items)
    .bind(&row.created_at)
    .bind(&row.updated_at)
    .execute(db)
    .await?;

    Ok(())
}

/// Writes every mutable column. `task_type` and `created_at` are never
/// touched. Returns false when the row no longer exists.
pub async fn update_task(db: &SqlitePool, row: &TaskRow) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE tasks
        SET title = ?1,
            description = ?2,
            completed = ?3,
            due_date = ?4,
            items = ?5,
            updated_at = ?6
        WHERE id = ?7
        "#,
    )
    .bind(&row.title)
    .bind(&row.description)
    .bind(row.completed)
    .bind(&row.due_date)
    .bind(&row.items)
    .bind(&row.updated_at)
    .bind(&row.id)
    .execute(db)
    .await?
    .rows_affected();

    Ok(result > 0)
}

pub async fn delete_task(db: &SqlitePool, id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM tasks WHERE id = ?1")
        .bind(id)
        .execute(db)
        .await?
        .rows_affected();

    Ok(result > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewTask;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_test_db() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create test db");

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("Failed to run migrations");

        pool
    }

    fn row(id: &str, new: NewTask) -> TaskRow {
        let task = new.into_task(id.to_string(), "2025-01-01T00:00:00+00:00".to_string());
        TaskRow::from_task(&task).expect("row")
    }

    #[tokio::test]
    async fn test_insert_and_fetch_task() {
        let pool = setup_test_db().await;

        let inserted = row(
            "01",
            NewTask::checklist(
                "Packing",
                vec![ChecklistItem::new("tent"), ChecklistItem::new("stove")],
            ),
        );
        insert_task(&pool, &inserted).await.expect("Failed to insert task");

        let tasks = fetch_tasks(&pool).await.expect("Failed to fetch tasks");
        assert_eq!(tasks, vec![inserted.clone()]);

        let task = tasks[0].clone().into_task().expect("valid row");
        assert_eq!(task.items().map(|items| items.len()), Some(2));
    }

    #[tokio::test]
    async fn test_fetch_orders_newest_first() {
        let pool = setup_test_db().await;
        insert_task(&pool, &row("01", NewTask::basic("first"))).await.unwrap();
        insert_task(&pool, &row("02", NewTask::basic("second"))).await.unwrap();

        let ids: Vec<String> = fetch_tasks(&pool)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["02", "01"]);
    }

    #[tokio::test]
    async fn test_update_task() {
        let pool = setup_test_db().await;
        let mut current = row("01", NewTask::basic("Draft"));
        insert_task(&pool, &current).await.unwrap();

        current.title = "Final".to_string();
        current.completed = true;
        assert!(update_task(&pool, &current).await.expect("Failed to update task"));

        let stored = find_task_by_id(&pool, "01").await.unwrap().expect("Task not found");
        assert_eq!(stored.title, "Final");
        assert!(stored.completed);

        let missing = row("99", NewTask::basic("ghost"));
        assert!(!update_task(&pool, &missing).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_task() {
        let pool = setup_test_db().await;
        insert_task(&pool, &row("01", NewTask::basic("Trash me"))).await.unwrap();

        assert!(delete_task(&pool, "01").await.expect("Failed to delete task"));
        assert!(!delete_task(&pool, "01").await.unwrap());
        assert!(find_task_by_id(&pool, "01").await.unwrap().is_none());
    }

    #[test]
    fn test_unreadable_due_date_becomes_none() {
        let mut raw = row("01", NewTask::timed("Call", None));
        raw.due_date = Some("someday".to_string());

        let task = raw.into_task().unwrap();
        assert_eq!(task.due_date(), None);
    }

    #[test]
    fn test_unknown_task_type_is_corrupt() {
        let mut raw = row("01", NewTask::basic("Odd"));
        raw.task_type = "recurring".to_string();

        assert!(matches!(raw.into_task(), Err(StoreError::Corrupt { .. })));
    }
}
