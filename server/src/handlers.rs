// Copyright (c) 2025 sbksba
//
// This software is licensed under the terms of the MIT License.
// See the LICENSE file in the project root for the full license text.
use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use common::{
    Task, TaskCategory, TaskCreationRequest, TaskId, TaskPriority, TaskStats, ValidationError,
    next_due,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::AppState;
use crate::scheduler::{CycleReport, run_evaluation_cycle};

/// Optional filters for the task list.
#[derive(Deserialize, Debug, Default)]
pub struct TaskFilter {
    pub category: Option<TaskCategory>,
    pub priority: Option<TaskPriority>,
    pub completed: Option<bool>,
    pub assigned_to: Option<String>,
    pub tag: Option<String>,
}

impl TaskFilter {
    fn matches(&self, task: &Task) -> bool {
        self.category.is_none_or(|c| task.category == c)
            && self.priority.is_none_or(|p| task.priority == p)
            && self.completed.is_none_or(|c| task.completed == c)
            && self
                .assigned_to
                .as_deref()
                .is_none_or(|who| task.assigned_to.as_deref() == Some(who))
            && self.tag.as_ref().is_none_or(|tag| task.tags.contains(tag))
    }
}

/// A task together with the date its next occurrence falls due.
#[derive(Serialize, Debug)]
pub struct TaskView {
    #[serde(flatten)]
    pub task: Task,
    pub next_due: Option<DateTime<Utc>>,
}

#[derive(Deserialize, Debug)]
pub struct CompletionPayload {
    pub completed: bool,
}

/// Handler for listing tasks.
///
/// When `evaluate_on_list` is set, due occurrences are generated first and
/// the list is read back afterwards, so the response reflects what was stored.
pub async fn list_tasks(
    State(state): State<AppState>,
    Query(filter): Query<TaskFilter>,
) -> Result<Json<Vec<Task>>, AppError> {
    if state.evaluate_on_list {
        // Listing still works if generation fails; the next request retries.
        if let Err(e) = run_evaluation_cycle(state.store.as_ref(), Utc::now()).await {
            error!("Evaluation before listing failed: {:?}", e);
        }
    }

    let tasks: Vec<Task> = state
        .store
        .list_tasks()
        .await?
        .into_iter()
        .filter(|t| filter.matches(t))
        .collect();
    info!("Successfully retrieved {} tasks.", tasks.len());
    Ok(Json(tasks))
}

/// Handler for fetching a single task.
pub async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<TaskId>,
) -> Result<Json<TaskView>, AppError> {
    let task = state
        .store
        .get_task(task_id)
        .await?
        .ok_or_else(|| AppError::not_found(task_id))?;

    let next_due = if task.is_template() && !task.completed {
        next_due(&task)
    } else {
        None
    };
    Ok(Json(TaskView { task, next_due }))
}

/// Handler for creating a new task.
pub async fn create_task(
    State(state): State<AppState>,
    Json(payload): Json<TaskCreationRequest>,
) -> Result<(StatusCode, Json<Task>), AppError> {
    debug!("Received request to create task: {}", payload.title);

    if let Err(e) = payload.validate() {
        error!("Validation failed: {}", e);
        return Err(e.into());
    }

    let new_task = state.store.create_task(payload).await?;

    info!("Task created successfully with ID: {}", new_task.id);

    // Return a 201 Created status with the new task as JSON.
    Ok((StatusCode::CREATED, Json(new_task)))
}

/// Handler for marking a task completed or reopening it.
pub async fn update_completion(
    State(state): State<AppState>,
    Path(task_id): Path<TaskId>,
    Json(payload): Json<CompletionPayload>,
) -> Result<Json<Task>, AppError> {
    let completed_at = payload.completed.then(Utc::now);
    let updated = state
        .store
        .update_task_completion(task_id, payload.completed, completed_at)
        .await?;
    if !updated {
        return Err(AppError::not_found(task_id));
    }

    let task = state
        .store
        .get_task(task_id)
        .await?
        .ok_or_else(|| AppError::not_found(task_id))?;
    Ok(Json(task))
}

/// Handler for deleting a task by ID.
pub async fn delete_task(
    State(state): State<AppState>,
    Path(task_id): Path<TaskId>,
) -> Result<StatusCode, AppError> {
    debug!("Attempting to delete task with ID: {}", task_id);

    if state.store.delete_task(task_id).await? {
        info!("Task with ID {} deleted successfully.", task_id);
        Ok(StatusCode::NO_CONTENT)
    } else {
        error!("Task with ID {} not found for deletion.", task_id);
        Err(AppError::not_found(task_id))
    }
}

/// Handler for running an evaluation cycle on demand.
pub async fn evaluate_recurrence(
    State(state): State<AppState>,
) -> Result<Json<CycleReport>, AppError> {
    debug!("Received request to evaluate recurring tasks.");
    let report = run_evaluation_cycle(state.store.as_ref(), Utc::now()).await?;
    Ok(Json(report))
}

/// Handler for the task counters.
pub async fn task_stats(State(state): State<AppState>) -> Result<Json<TaskStats>, AppError> {
    let tasks = state.store.list_tasks().await?;
    Ok(Json(TaskStats::from_tasks(&tasks, Utc::now())))
}

// --- Custom Error Handling ---

/// Error returned by handlers, rendered as `{ "error": message }`.
#[derive(Debug)]
pub struct AppError {
    code: StatusCode,
    message: String,
}

impl AppError {
    fn new(code: StatusCode, message: &str) -> Self {
        Self {
            code,
            message: message.to_string(),
        }
    }

    fn not_found(task_id: TaskId) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            &format!("Task with ID {task_id} not found."),
        )
    }
}

/// Allows converting an `anyhow::Error` (coming from the store)
/// into our `AppError`.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!("Internal server error: {:?}", err);
        Self {
            code: StatusCode::INTERNAL_SERVER_ERROR,
            message: "An internal error occurred.".to_string(),
        }
    }
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        Self::new(StatusCode::BAD_REQUEST, &err.to_string())
    }
}

/// Allows Axum to convert our `AppError` into an HTTP `Response`.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        tracing::error!(
            "Responding with error: status_code={}, message={}",
            self.code.as_u16(),
            self.message
        );
        (
            self.code,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}
