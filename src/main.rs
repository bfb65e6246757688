use std::sync::Arc;

use sqlx::sqlite::SqlitePoolOptions;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use taskboard::api::router;
use taskboard::config::AppConfig;
use taskboard::notifier::OverdueNotifier;
use taskboard::services::{OverdueScheduler, TaskBoard, spawn_change_listener};
use taskboard::state::AppState;
use taskboard::store::{SqliteTaskStore, TaskStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "taskboard=debug".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    let store = Arc::new(SqliteTaskStore::new(pool));

    let board = Arc::new(TaskBoard::new(store.clone()));
    let loaded = board.refresh().await?;
    info!("loaded {} tasks", loaded);

    let notifier = Arc::new(OverdueNotifier::with_system_clock(config.reminder_cooldown));
    notifier.subscribe(|task, message| warn!(task_id = %task.id, "{}", message));

    let scheduler_refresh = match store.changes() {
        Some(changes) => {
            spawn_change_listener(board.clone(), changes, Some(notifier.clone()));
            false
        }
        None => true,
    };

    let scheduler = OverdueScheduler::new(board, notifier, config.overdue_check_interval)
        .with_refresh(scheduler_refresh);
    tokio::spawn(scheduler.start());

    let app = router(AppState::new(store));

    info!("listening on http://{}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
