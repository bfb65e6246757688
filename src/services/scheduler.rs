use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::notifier::{OverdueNotifier, Reminder};
use crate::services::board::{BoardError, TaskBoard};

/// Overdue scheduler
/// Periodically feeds the board's tasks to the notifier
pub struct OverdueScheduler {
    board: Arc<TaskBoard>,
    notifier: Arc<OverdueNotifier>,
    interval: Duration,
    refresh: bool,
}

impl OverdueScheduler {
    pub fn new(board: Arc<TaskBoard>, notifier: Arc<OverdueNotifier>, interval: Duration) -> Self {
        Self {
            board,
            notifier,
            interval,
            refresh: false,
        }
    }

    /// Re-fetch the board from the store before every scan. Useful when
    /// nothing else keeps the board current.
    pub fn with_refresh(mut self, refresh: bool) -> Self {
        self.refresh = refresh;
        self
    }

    /// Runs the check forever
    pub async fn start(self) {
        info!("Starting overdue scheduler (interval: {:?})", self.interval);

        loop {
            tokio::time::sleep(self.interval).await;

            match self.run_once().await {
                Ok(reminders) => {
                    if !reminders.is_empty() {
                        info!("Overdue check sent {} reminder(s)", reminders.len());
                    }
                }
                Err(e) => {
                    warn!("Overdue check failed: {:?}", e);
                    // keep going
                }
            }
        }
    }

    /// One scan of the board
    pub async fn run_once(&self) -> Result<Vec<Reminder>, BoardError> {
        if self.refresh {
            self.board.refresh().await?;
        }
        Ok(self.notifier.check_for_overdue_tasks(&self.board.tasks()))
    }
}
