//! Client-side task board.
//!
//! # Responsibility
//! - Keep a local mirror of the store for immediate reads.
//! - Apply completion toggles, checklist checks and deletes to the mirror
//!   before the store confirms them, and reconcile afterwards.
//!
//! # Invariants
//! - A task id has at most one change in flight. A second change on a
//!   pending id is refused with `BoardError::Busy`.
//! - A failed store call restores the task's last confirmed value at its
//!   previous position.
//! - New tasks enter the mirror only after the store assigned their id.
//! - A refresh never overwrites a task that changed locally while its
//!   fetch was in flight.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::models::{NewTask, Task, TaskKind, TaskPatch, ValidationError};
use crate::sorting::SortMethod;
use crate::store::{StoreError, TaskStore};

#[derive(Debug, Error)]
pub enum BoardError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("task {0} already has a change in flight")]
    Busy(String),

    #[error("task {0} is not a checklist")]
    NotChecklist(String),

    #[error("task {id} has no checklist item {index}")]
    ItemOutOfRange { id: String, index: usize },
}

/// Lifecycle of the latest change made to one task id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MutationState {
    #[default]
    Idle,
    Pending,
    Committed,
    RolledBack,
}

pub struct TaskBoard {
    store: Arc<dyn TaskStore>,
    state: Mutex<BoardState>,
}

#[derive(Default)]
struct BoardState {
    tasks: Vec<Task>,
    query: String,
    sort: SortMethod,
    mutations: HashMap<String, MutationState>,
    /// Bumped on every local change.
    epoch: u64,
    /// Refreshes waiting on the store.
    refreshing: usize,
    /// Epoch of the last local change per id, kept while a refresh is in
    /// flight.
    touched: HashMap<String, u64>,
}

impl BoardState {
    fn is_pending(&self, id: &str) -> bool {
        self.mutations.get(id) == Some(&MutationState::Pending)
    }

    fn touch(&mut self, id: &str) {
        self.epoch += 1;
        if self.refreshing > 0 {
            let epoch = self.epoch;
            self.touched.insert(id.to_string(), epoch);
        }
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.tasks.iter().position(|t| t.id == id)
    }

    /// Replaces the entry with the same id, or inserts at `fallback`.
    fn put(&mut self, task: Task, fallback: usize) {
        match self.position(&task.id) {
            Some(index) => self.tasks[index] = task,
            None => {
                let index = fallback.min(self.tasks.len());
                self.tasks.insert(index, task);
            }
        }
    }
}

impl TaskBoard {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self {
            store,
            state: Mutex::new(BoardState::default()),
        }
    }

    /// Replaces the mirror with the store's collection. Tasks with a
    /// change in flight, or changed locally while the fetch ran, keep their
    /// local version (or stay removed).
    pub async fn refresh(&self) -> Result<usize, BoardError> {
        let started = {
            let mut state = self.state();
            state.refreshing += 1;
            state.epoch
        };
        let fetched = self.store.get_all().await;

        let mut state = self.state();
        state.refreshing = state.refreshing.saturating_sub(1);
        let fetched = match fetched {
            Ok(tasks) => tasks,
            Err(e) => {
                error!("failed to load tasks: {}", e);
                if state.refreshing == 0 {
                    state.touched.clear();
                }
                return Err(e.into());
            }
        };

        let local_wins: HashSet<String> = state
            .touched
            .iter()
            .filter(|(_, at)| **at > started)
            .map(|(id, _)| id.clone())
            .chain(
                state
                    .mutations
                    .iter()
                    .filter(|(_, s)| **s == MutationState::Pending)
                    .map(|(id, _)| id.clone()),
            )
            .collect();
        let seen: HashSet<String> = fetched.iter().map(|t| t.id.clone()).collect();

        let mut merged = Vec::with_capacity(fetched.len());
        for task in fetched {
            if local_wins.contains(&task.id) {
                if let Some(local) = state.tasks.iter().find(|t| t.id == task.id) {
                    merged.push(local.clone());
                }
            } else {
                merged.push(task);
            }
        }
        // added or restored locally after the store took its snapshot
        for (index, local) in state.tasks.iter().enumerate() {
            if local_wins.contains(&local.id) && !seen.contains(&local.id) {
                merged.insert(index.min(merged.len()), local.clone());
            }
        }

        let known: HashSet<&str> = merged.iter().map(|t| t.id.as_str()).collect();
        state
            .mutations
            .retain(|id, s| *s == MutationState::Pending || known.contains(id.as_str()));
        state.tasks = merged;
        if state.refreshing == 0 {
            state.touched.clear();
        }

        debug!("board refreshed with {} tasks", state.tasks.len());
        Ok(state.tasks.len())
    }

    /// Snapshot of the mirror in store order.
    pub fn tasks(&self) -> Vec<Task> {
        self.state().tasks.clone()
    }

    pub fn get(&self, id: &str) -> Option<Task> {
        let state = self.state();
        state.position(id).map(|index| state.tasks[index].clone())
    }

    pub fn set_query(&self, query: impl Into<String>) {
        self.state().query = query.into();
    }

    pub fn query(&self) -> String {
        self.state().query.clone()
    }

    pub fn set_sort(&self, sort: SortMethod) {
        self.state().sort = sort;
    }

    pub fn sort(&self) -> SortMethod {
        self.state().sort
    }

    /// The mirror filtered by the current query and ordered by the current
    /// sort method. Filtering never goes back to the store.
    pub fn visible(&self) -> Vec<Task> {
        let state = self.state();
        let filtered: Vec<Task> = state
            .tasks
            .iter()
            .filter(|t| t.matches_query(&state.query))
            .cloned()
            .collect();
        state.sort.apply(&filtered)
    }

    pub fn mutation_state(&self, id: &str) -> MutationState {
        self.state().mutations.get(id).copied().unwrap_or_default()
    }

    /// Creates a task and prepends it once the store confirms it.
    pub async fn add(&self, task: NewTask) -> Result<Task, BoardError> {
        let task = task.normalized()?;
        let created = self.store.add(task).await.map_err(|e| {
            error!("failed to add task: {}", e);
            e
        })?;

        let mut state = self.state();
        state.tasks.retain(|t| t.id != created.id);
        state.tasks.insert(0, created.clone());
        state.touch(&created.id);
        info!("task {} added to board", created.id);
        Ok(created)
    }

    /// Flips `completed`. `Ok(None)` when the id is unknown here or the
    /// store no longer has it.
    pub async fn toggle_complete(&self, id: &str) -> Result<Option<Task>, BoardError> {
        let Some((pending, edited)) = self.begin(id, |tasks, index| {
            let task = &mut tasks[index];
            task.completed = !task.completed;
            Ok(())
        })?
        else {
            return Ok(None);
        };

        let completed = edited.map(|t| t.completed).unwrap_or_default();
        match self.store.update(id, TaskPatch::completed(completed)).await {
            Ok(confirmed) => Ok(pending.commit(confirmed)),
            Err(e) => {
                error!("failed to update task {}: {}", id, e);
                pending.rollback();
                Err(e.into())
            }
        }
    }

    /// Flips one checklist item, persists it, then brings `completed` in
    /// line with the items: all checked means done, anything unchecked
    /// means not done.
    pub async fn toggle_checklist_item(
        &self,
        id: &str,
        item: usize,
    ) -> Result<Option<Task>, BoardError> {
        let Some((pending, edited)) = self.begin(id, |tasks, index| {
            let TaskKind::Checklist { items } = &mut tasks[index].kind else {
                return Err(BoardError::NotChecklist(id.to_string()));
            };
            let entry = items.get_mut(item).ok_or_else(|| BoardError::ItemOutOfRange {
                id: id.to_string(),
                index: item,
            })?;
            entry.checked = !entry.checked;
            Ok(())
        })?
        else {
            return Ok(None);
        };

        let items = edited
            .as_ref()
            .and_then(Task::items)
            .map(<[_]>::to_vec)
            .unwrap_or_default();

        let persisted = match self.store.update(id, TaskPatch::items(items)).await {
            Ok(Some(task)) => task,
            Ok(None) => return Ok(pending.commit(None)),
            Err(e) => {
                error!("failed to update items of task {}: {}", id, e);
                pending.rollback();
                return Err(e.into());
            }
        };

        let confirmed = match persisted.derived_completion() {
            Some(done) if done != persisted.completed => {
                match self.store.update(id, TaskPatch::completed(done)).await {
                    Ok(confirmed) => confirmed,
                    Err(e) => {
                        error!("failed to update completion of task {}: {}", id, e);
                        pending.rollback();
                        return Err(e.into());
                    }
                }
            }
            _ => Some(persisted),
        };

        Ok(pending.commit(confirmed))
    }

    /// Removes the task. Returns whether the store still had it. If the
    /// store call fails the task goes back where it was.
    pub async fn delete(&self, id: &str) -> Result<bool, BoardError> {
        let Some((pending, _)) = self.begin(id, |tasks, index| {
            tasks.remove(index);
            Ok(())
        })?
        else {
            return self.store.remove(id).await.map_err(|e| {
                error!("failed to delete task {}: {}", id, e);
                e.into()
            });
        };

        match self.store.remove(id).await {
            Ok(existed) => {
                if !existed {
                    warn!("task {} was already gone from the store", id);
                }
                pending.commit(None);
                Ok(existed)
            }
            Err(e) => {
                error!("failed to delete task {}: {}", id, e);
                pending.rollback();
                Err(e.into())
            }
        }
    }

    /// Applies `edit` to the mirror and marks `id` pending. The edit must
    /// leave the mirror alone when it fails.
    fn begin<F>(
        &self,
        id: &str,
        edit: F,
    ) -> Result<Option<(PendingMutation<'_>, Option<Task>)>, BoardError>
    where
        F: FnOnce(&mut Vec<Task>, usize) -> Result<(), BoardError>,
    {
        let mut state = self.state();
        if state.is_pending(id) {
            debug!("refusing change to task {}: already pending", id);
            return Err(BoardError::Busy(id.to_string()));
        }
        let Some(index) = state.position(id) else {
            return Ok(None);
        };

        let before = state.tasks[index].clone();
        edit(&mut state.tasks, index)?;
        state.mutations.insert(id.to_string(), MutationState::Pending);
        state.touch(id);
        let edited = state.position(id).map(|i| state.tasks[i].clone());

        Ok(Some((
            PendingMutation {
                board: self,
                id: id.to_string(),
                before: Some((index, before)),
            },
            edited,
        )))
    }

    fn state(&self) -> MutexGuard<'_, BoardState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// An optimistic change waiting for the store. Dropping it unsettled
/// (for instance when the caller's future is cancelled) rolls it back.
struct PendingMutation<'a> {
    board: &'a TaskBoard,
    id: String,
    before: Option<(usize, Task)>,
}

impl PendingMutation<'_> {
    /// Records the store's answer. `None` means the task is gone.
    fn commit(mut self, confirmed: Option<Task>) -> Option<Task> {
        let Some((index, _)) = self.before.take() else {
            return confirmed;
        };
        let mut state = self.board.state();
        match &confirmed {
            Some(task) => {
                state.put(task.clone(), index);
                state
                    .mutations
                    .insert(self.id.clone(), MutationState::Committed);
            }
            None => {
                state.tasks.retain(|t| t.id != self.id);
                state.mutations.remove(&self.id);
            }
        }
        state.touch(&self.id);
        confirmed
    }

    fn rollback(mut self) {
        self.restore();
    }

    fn restore(&mut self) {
        let Some((index, before)) = self.before.take() else {
            return;
        };
        let mut state = self.board.state();
        state.put(before, index);
        state
            .mutations
            .insert(self.id.clone(), MutationState::RolledBack);
        state.touch(&self.id);
        debug!("task {} rolled back", self.id);
    }
}

impl Drop for PendingMutation<'_> {
    fn drop(&mut self) {
        self.restore();
    }
}
