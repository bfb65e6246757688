use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::notifier::OverdueNotifier;
use crate::services::board::TaskBoard;
use crate::store::TaskChange;

/// Re-fetches the board whenever the store reports a change. With a
/// notifier, created and updated tasks are announced to its subscribers
/// once the refreshed board has them. The task ends when the store's feed
/// closes.
pub fn spawn_change_listener(
    board: Arc<TaskBoard>,
    mut changes: broadcast::Receiver<TaskChange>,
    notifier: Option<Arc<OverdueNotifier>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let changed = match changes.recv().await {
                Ok(change) => {
                    debug!("store change: {:?}", change);
                    match change {
                        TaskChange::Created(id) | TaskChange::Updated(id) => Some(id),
                        TaskChange::Deleted(_) => None,
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    debug!("change feed lagged by {} events", missed);
                    None
                }
                Err(RecvError::Closed) => {
                    info!("change feed closed");
                    break;
                }
            };

            if let Err(e) = board.refresh().await {
                warn!("refresh after store change failed: {}", e);
                continue;
            }

            if let (Some(notifier), Some(id)) = (&notifier, changed) {
                match board.get(&id) {
                    Some(task) => {
                        notifier.notify_updated(&task);
                    }
                    None => debug!("task {} gone before it could be announced", id),
                }
            }
        }
    })
}
