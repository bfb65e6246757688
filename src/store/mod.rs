//! Task store façade.
//!
//! `TaskStore` is the only way the rest of the crate reaches the task
//! collection. One instance is built at startup and shared as
//! `Arc<dyn TaskStore>`.

pub mod http;
pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::models::{NewTask, Task, TaskPatch, ValidationError};

pub use http::HttpTaskStore;
pub use memory::MemoryTaskStore;
pub use sqlite::SqliteTaskStore;

const CHANGE_FEED_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Remote store returned {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("Corrupt task record {id}: {reason}")]
    Corrupt { id: String, reason: String },

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Emitted after a write succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "id", rename_all = "snake_case")]
pub enum TaskChange {
    Created(String),
    Updated(String),
    Deleted(String),
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Inserts a task and returns it with its assigned id.
    async fn add(&self, task: NewTask) -> Result<Task, StoreError>;

    async fn get(&self, id: &str) -> Result<Option<Task>, StoreError>;

    /// Every task, in whatever order the store keeps them.
    async fn get_all(&self) -> Result<Vec<Task>, StoreError>;

    /// Merges `patch` over the stored task. `Ok(None)` when there is no
    /// task with that id.
    async fn update(&self, id: &str, patch: TaskPatch) -> Result<Option<Task>, StoreError>;

    /// `Ok(false)` when there was nothing to remove.
    async fn remove(&self, id: &str) -> Result<bool, StoreError>;

    /// Case-insensitive substring search over title and description.
    async fn search(&self, query: &str) -> Result<Vec<Task>, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Realtime change feed, for stores that have one.
    fn changes(&self) -> Option<broadcast::Receiver<TaskChange>> {
        None
    }
}

pub(crate) fn change_feed() -> broadcast::Sender<TaskChange> {
    broadcast::channel(CHANGE_FEED_CAPACITY).0
}

pub(crate) fn new_task_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

pub(crate) fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}
