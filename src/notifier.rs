//! Overdue reminders.
//!
//! A task is overdue when its due date is in the past and it is not
//! completed. Each overdue task is announced once, then suppressed until
//! the cooldown expires; a scan after expiry announces it again if it is
//! still overdue.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::clock::{Clock, SystemClock};
use crate::models::Task;

pub const DEFAULT_COOLDOWN: std::time::Duration = std::time::Duration::from_secs(5 * 60);

pub type ReminderHandler = Arc<dyn Fn(&Task, &str) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reminder {
    pub task_id: String,
    pub title: String,
    pub due_date: DateTime<Utc>,
    pub message: String,
}

pub struct OverdueNotifier {
    clock: Arc<dyn Clock>,
    cooldown: Duration,
    state: Mutex<NotifierState>,
}

#[derive(Default)]
struct NotifierState {
    next_subscription: u64,
    subscribers: Vec<(SubscriptionId, ReminderHandler)>,
    suppressed_until: HashMap<String, DateTime<Utc>>,
}

impl OverdueNotifier {
    pub fn new(clock: Arc<dyn Clock>, cooldown: std::time::Duration) -> Self {
        Self {
            clock,
            cooldown: Duration::from_std(cooldown).unwrap_or_else(|_| Duration::weeks(52)),
            state: Mutex::new(NotifierState::default()),
        }
    }

    pub fn with_system_clock(cooldown: std::time::Duration) -> Self {
        Self::new(Arc::new(SystemClock), cooldown)
    }

    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&Task, &str) + Send + Sync + 'static,
    {
        let mut state = self.state();
        state.next_subscription += 1;
        let id = SubscriptionId(state.next_subscription);
        state.subscribers.push((id, Arc::new(handler)));
        id
    }

    /// Returns false when `id` was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut state = self.state();
        let before = state.subscribers.len();
        state.subscribers.retain(|(sub, _)| *sub != id);
        state.subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.state().subscribers.len()
    }

    pub fn is_suppressed(&self, task_id: &str) -> bool {
        let now = self.clock.now();
        self.state()
            .suppressed_until
            .get(task_id)
            .is_some_and(|until| *until > now)
    }

    /// Announces every overdue task that is not in its cooldown window and
    /// returns what was announced.
    pub fn check_for_overdue_tasks(&self, tasks: &[Task]) -> Vec<Reminder> {
        let now = self.clock.now();
        let mut due_now = Vec::new();

        let handlers: Vec<ReminderHandler> = {
            let mut state = self.state();
            state.suppressed_until.retain(|_, until| *until > now);

            for task in tasks {
                let Some(due_date) = task.due_date() else {
                    continue;
                };
                if !task.is_overdue(now) || state.suppressed_until.contains_key(&task.id) {
                    continue;
                }
                state
                    .suppressed_until
                    .insert(task.id.clone(), now + self.cooldown);
                let reminder = Reminder {
                    task_id: task.id.clone(),
                    title: task.title.clone(),
                    due_date,
                    message: overdue_message(&task.title, now - due_date),
                };
                due_now.push((task, reminder));
            }

            state
                .subscribers
                .iter()
                .map(|(_, handler)| handler.clone())
                .collect()
        };

        if !due_now.is_empty() {
            info!(
                "{} overdue task(s), notifying {} subscriber(s)",
                due_now.len(),
                handlers.len()
            );
        }

        due_now
            .into_iter()
            .map(|(task, reminder)| {
                debug!("reminder for task {}: {}", task.id, reminder.message);
                for handler in &handlers {
                    handler(task, &reminder.message);
                }
                reminder
            })
            .collect()
    }

    /// Tells every subscriber that `task` changed in the store. Not subject
    /// to the overdue cooldown.
    pub fn notify_updated(&self, task: &Task) -> String {
        let message = format!("Task \"{}\" was updated", task.title);
        let handlers: Vec<ReminderHandler> = self
            .state()
            .subscribers
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();

        debug!("update notice for task {}", task.id);
        for handler in &handlers {
            handler(task, &message);
        }
        message
    }

    fn state(&self) -> MutexGuard<'_, NotifierState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn overdue_message(title: &str, overdue_by: Duration) -> String {
    let hours = overdue_by.num_hours();
    let when = if hours < 1 {
        "just now".to_string()
    } else if hours < 24 {
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else {
        let days = hours / 24;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    };
    format!("Task \"{}\" is overdue! (Due {})", title, when)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::{NewTask, TaskKind};
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn timed(id: &str, due: DateTime<Utc>) -> Task {
        NewTask::timed(format!("Task {}", id), Some(due)).into_task(id.into(), "now".into())
    }

    fn setup() -> (Arc<ManualClock>, OverdueNotifier, Arc<Mutex<Vec<String>>>) {
        let clock = Arc::new(ManualClock::new(start()));
        let notifier = OverdueNotifier::new(clock.clone(), DEFAULT_COOLDOWN);
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        notifier.subscribe(move |task, _message| sink.lock().unwrap().push(task.id.clone()));
        (clock, notifier, received)
    }

    #[test]
    fn test_notifies_once_within_cooldown() {
        let (_clock, notifier, received) = setup();
        let tasks = vec![timed("1", start() - Duration::minutes(10))];

        assert_eq!(notifier.check_for_overdue_tasks(&tasks).len(), 1);
        assert!(notifier.check_for_overdue_tasks(&tasks).is_empty());

        assert_eq!(*received.lock().unwrap(), vec!["1".to_string()]);
        assert!(notifier.is_suppressed("1"));
    }

    #[test]
    fn test_renotifies_after_cooldown() {
        let (clock, notifier, received) = setup();
        let tasks = vec![timed("1", start() - Duration::minutes(1))];

        notifier.check_for_overdue_tasks(&tasks);
        clock.advance(Duration::minutes(4));
        notifier.check_for_overdue_tasks(&tasks);
        clock.advance(Duration::minutes(2));
        notifier.check_for_overdue_tasks(&tasks);

        assert_eq!(received.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_skips_completed_future_and_dateless_tasks() {
        let (_clock, notifier, received) = setup();
        let mut completed = timed("done", start() - Duration::hours(1));
        completed.completed = true;
        let future = timed("later", start() + Duration::hours(1));
        let dateless = NewTask::timed("no date", None).into_task("none".into(), "now".into());
        let basic = NewTask::basic("plain").into_task("basic".into(), "now".into());

        let reminders = notifier.check_for_overdue_tasks(&[completed, future, dateless, basic]);

        assert!(reminders.is_empty());
        assert!(received.lock().unwrap().is_empty());
    }

    #[test]
    fn test_completed_task_stops_while_suppressed() {
        let (clock, notifier, received) = setup();
        let mut task = timed("1", start() - Duration::minutes(30));

        notifier.check_for_overdue_tasks(std::slice::from_ref(&task));
        task.completed = true;
        clock.advance(Duration::minutes(10));
        notifier.check_for_overdue_tasks(std::slice::from_ref(&task));

        assert_eq!(received.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_cleared_due_date_stops_while_suppressed() {
        let (clock, notifier, received) = setup();
        let mut task = timed("1", start() - Duration::minutes(30));

        notifier.check_for_overdue_tasks(std::slice::from_ref(&task));
        task.kind = TaskKind::Timed { due_date: None };
        clock.advance(Duration::minutes(10));
        let reminders = notifier.check_for_overdue_tasks(std::slice::from_ref(&task));

        assert!(reminders.is_empty());
        assert_eq!(received.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_notify_updated_reaches_every_subscriber() {
        let (clock, notifier, received) = setup();
        let messages = Arc::new(Mutex::new(Vec::new()));
        let sink = messages.clone();
        notifier.subscribe(move |_, message| sink.lock().unwrap().push(message.to_string()));
        let task = timed("1", start() - Duration::minutes(30));

        notifier.check_for_overdue_tasks(std::slice::from_ref(&task));
        let message = notifier.notify_updated(&task);

        assert_eq!(message, "Task \"Task 1\" was updated");
        assert_eq!(received.lock().unwrap().len(), 2);
        assert_eq!(messages.lock().unwrap().last(), Some(&message));
        assert!(notifier.is_suppressed("1"));
        clock.advance(Duration::minutes(1));
        assert!(notifier.check_for_overdue_tasks(&[task]).is_empty());
    }

    #[test]
    fn test_message_mentions_title_and_urgency() {
        let (_clock, notifier, _received) = setup();
        let tasks = vec![
            timed("a", start() - Duration::minutes(5)),
            timed("b", start() - Duration::hours(1)),
            timed("c", start() - Duration::hours(50)),
        ];

        let messages: Vec<String> = notifier
            .check_for_overdue_tasks(&tasks)
            .into_iter()
            .map(|r| r.message)
            .collect();

        assert_eq!(
            messages,
            vec![
                "Task \"Task a\" is overdue! (Due just now)",
                "Task \"Task b\" is overdue! (Due 1 hour ago)",
                "Task \"Task c\" is overdue! (Due 2 days ago)",
            ]
        );
    }

    #[test]
    fn test_unsubscribe() {
        let (_clock, notifier, received) = setup();
        let extra = notifier.subscribe(|_, _| {});
        assert_eq!(notifier.subscriber_count(), 2);

        assert!(notifier.unsubscribe(extra));
        assert!(!notifier.unsubscribe(extra));
        assert_eq!(notifier.subscriber_count(), 1);

        notifier.check_for_overdue_tasks(&[timed("1", start() - Duration::hours(2))]);
        assert_eq!(received.lock().unwrap().len(), 1);
    }
}
