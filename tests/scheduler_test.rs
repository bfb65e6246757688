use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use taskboard::clock::{Clock, ManualClock};
use taskboard::models::NewTask;
use taskboard::notifier::{DEFAULT_COOLDOWN, OverdueNotifier};
use taskboard::services::{OverdueScheduler, TaskBoard};
use taskboard::store::{MemoryTaskStore, TaskStore};

fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()))
}

async fn board_with_overdue_task(clock: &ManualClock) -> (Arc<MemoryTaskStore>, Arc<TaskBoard>) {
    let store = Arc::new(MemoryTaskStore::new());
    store
        .add(NewTask::timed(
            "Pay rent",
            Some(clock.now() - chrono::Duration::hours(3)),
        ))
        .await
        .expect("Failed to add task");
    store
        .add(NewTask::timed(
            "Next week",
            Some(clock.now() + chrono::Duration::days(7)),
        ))
        .await
        .expect("Failed to add task");

    let board = Arc::new(TaskBoard::new(store.clone()));
    board.refresh().await.expect("Failed to load board");
    (store, board)
}

#[tokio::test]
async fn test_run_once_reminds_once_per_cooldown() {
    let clock = clock();
    let (_store, board) = board_with_overdue_task(&clock).await;
    let notifier = Arc::new(OverdueNotifier::new(clock.clone(), DEFAULT_COOLDOWN));

    let scheduler = OverdueScheduler::new(board, notifier, Duration::from_secs(60));

    let first = scheduler.run_once().await.unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].title, "Pay rent");
    assert!(first[0].message.contains("overdue"));

    assert!(scheduler.run_once().await.unwrap().is_empty());

    clock.advance(chrono::Duration::minutes(6));
    assert_eq!(scheduler.run_once().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_run_once_with_refresh_sees_new_tasks() {
    let clock = clock();
    let (store, board) = board_with_overdue_task(&clock).await;
    let notifier = Arc::new(OverdueNotifier::new(clock.clone(), DEFAULT_COOLDOWN));
    let scheduler =
        OverdueScheduler::new(board, notifier, Duration::from_secs(60)).with_refresh(true);

    assert_eq!(scheduler.run_once().await.unwrap().len(), 1);

    store
        .add(NewTask::timed("Taxes", Some(clock.now() - chrono::Duration::hours(1))))
        .await
        .unwrap();

    let reminders = scheduler.run_once().await.unwrap();
    assert_eq!(reminders.len(), 1);
    assert_eq!(reminders[0].title, "Taxes");
}

#[tokio::test]
async fn test_run_once_surfaces_refresh_failure() {
    let clock = clock();
    let (store, board) = board_with_overdue_task(&clock).await;
    let notifier = Arc::new(OverdueNotifier::new(clock.clone(), DEFAULT_COOLDOWN));
    let scheduler =
        OverdueScheduler::new(board, notifier, Duration::from_secs(60)).with_refresh(true);

    store.set_unavailable(true);

    assert!(scheduler.run_once().await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_ticks_on_interval() {
    let clock = clock();
    let (_store, board) = board_with_overdue_task(&clock).await;
    let notifier = Arc::new(OverdueNotifier::new(clock.clone(), Duration::from_secs(1)));

    let reminders = Arc::new(AtomicUsize::new(0));
    let counter = reminders.clone();
    notifier.subscribe(move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let scheduler = OverdueScheduler::new(board, notifier, Duration::from_secs(60));
    let scheduler_task = tokio::spawn(scheduler.start());

    // nothing before the first interval elapses
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(reminders.load(Ordering::SeqCst), 0);

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(reminders.load(Ordering::SeqCst), 1);

    // the manual clock has not moved, so the task stays suppressed
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(reminders.load(Ordering::SeqCst), 1);

    scheduler_task.abort();
}
