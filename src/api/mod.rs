use axum::Json;
use axum::extract::{Path, Query};
use axum::{Router, extract::State, http::StatusCode, routing::get};
use serde::Deserialize;

use crate::error::AppError;
use crate::models::{NewTask, Task, TaskPatch};
use crate::state::AppState;

#[derive(Deserialize)]
struct TaskQueryParams {
    #[serde(default)]
    q: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/tasks", get(list_tasks).post(create_task))
        .route(
            "/tasks/{id}",
            get(get_task).patch(update_task).delete(delete_task),
        )
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Result<StatusCode, AppError> {
    state.store.health_check().await?;
    Ok(StatusCode::OK)
}

async fn list_tasks(
    State(state): State<AppState>,
    Query(params): Query<TaskQueryParams>,
) -> Result<Json<Vec<Task>>, AppError> {
    let tasks = match params.q.as_deref().map(str::trim) {
        Some(query) if !query.is_empty() => state.store.search(query).await?,
        _ => state.store.get_all().await?,
    };
    Ok(Json(tasks))
}

async fn create_task(
    State(state): State<AppState>,
    Json(req): Json<NewTask>,
) -> Result<(StatusCode, Json<Task>), AppError> {
    req.validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;
    let task = state.store.add(req).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Task>, AppError> {
    let task = state.store.get(&id).await?.ok_or(AppError::NotFound)?;
    Ok(Json(task))
}

async fn update_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<TaskPatch>,
) -> Result<Json<Task>, AppError> {
    let task = state
        .store
        .update(&id, req)
        .await?
        .ok_or(AppError::NotFound)?;
    Ok(Json(task))
}

async fn delete_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let ok = state.store.remove(&id).await?;
    if ok {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound)
    }
}
