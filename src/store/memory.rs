use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::warn;

use crate::models::{NewTask, Task, TaskPatch};
use crate::store::{StoreError, TaskChange, TaskStore, change_feed, new_task_id, timestamp};

/// Process-local store keeping tasks in insertion order.
///
/// `set_unavailable(true)` makes every call fail until switched back,
/// which is how callers exercise their failure paths.
pub struct MemoryTaskStore {
    tasks: Mutex<Vec<Task>>,
    unavailable: AtomicBool,
    changes: broadcast::Sender<TaskChange>,
}

impl Default for MemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(Vec::new()),
            unavailable: AtomicBool::new(false),
            changes: change_feed(),
        }
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.tasks().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks().is_empty()
    }

    fn tasks(&self) -> MutexGuard<'_, Vec<Task>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_available(&self, operation: &str) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            warn!("memory store rejected {}", operation);
            return Err(StoreError::Unavailable(format!("{} rejected", operation)));
        }
        Ok(())
    }

    fn publish(&self, change: TaskChange) {
        let _ = self.changes.send(change);
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn add(&self, task: NewTask) -> Result<Task, StoreError> {
        self.ensure_available("add")?;
        let task = task.normalized()?.into_task(new_task_id(), timestamp());
        self.tasks().push(task.clone());
        self.publish(TaskChange::Created(task.id.clone()));
        Ok(task)
    }

    async fn get(&self, id: &str) -> Result<Option<Task>, StoreError> {
        self.ensure_available("get")?;
        Ok(self.tasks().iter().find(|t| t.id == id).cloned())
    }

    async fn get_all(&self) -> Result<Vec<Task>, StoreError> {
        self.ensure_available("get_all")?;
        Ok(self.tasks().clone())
    }

    async fn update(&self, id: &str, patch: TaskPatch) -> Result<Option<Task>, StoreError> {
        self.ensure_available("update")?;
        let updated = {
            let mut tasks = self.tasks();
            let Some(current) = tasks.iter_mut().find(|t| t.id == id) else {
                return Ok(None);
            };
            current.apply_patch(patch)?;
            current.updated_at = timestamp();
            current.clone()
        };
        self.publish(TaskChange::Updated(updated.id.clone()));
        Ok(Some(updated))
    }

    async fn remove(&self, id: &str) -> Result<bool, StoreError> {
        self.ensure_available("remove")?;
        let removed = {
            let mut tasks = self.tasks();
            let before = tasks.len();
            tasks.retain(|t| t.id != id);
            tasks.len() != before
        };
        if removed {
            self.publish(TaskChange::Deleted(id.to_string()));
        }
        Ok(removed)
    }

    async fn search(&self, query: &str) -> Result<Vec<Task>, StoreError> {
        self.ensure_available("search")?;
        Ok(self
            .tasks()
            .iter()
            .filter(|t| t.matches_query(query))
            .cloned()
            .collect())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.ensure_available("health_check")
    }

    fn changes(&self) -> Option<broadcast::Receiver<TaskChange>> {
        Some(self.changes.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_search_is_case_insensitive() {
        let store = MemoryTaskStore::new();
        store.add(NewTask::basic("Timed Task Test")).await.unwrap();
        store.add(NewTask::basic("Basic Task Test")).await.unwrap();

        let found = store.search("Timed").await.unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].title, "Timed Task Test");
        assert_eq!(store.search("task test").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unavailable_store_rejects_everything() {
        let store = MemoryTaskStore::new();
        let task = store.add(NewTask::basic("Keep")).await.unwrap();

        store.set_unavailable(true);
        assert!(matches!(store.get_all().await, Err(StoreError::Unavailable(_))));
        assert!(store.remove(&task.id).await.is_err());

        store.set_unavailable(false);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_patch_leaves_task_untouched() {
        let store = MemoryTaskStore::new();
        let task = store.add(NewTask::basic("Plain")).await.unwrap();

        let err = store
            .update(
                &task.id,
                TaskPatch {
                    title: Some(" ".into()),
                    ..TaskPatch::default()
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Validation(_)));
        assert_eq!(store.get(&task.id).await.unwrap(), Some(task));
    }
}
