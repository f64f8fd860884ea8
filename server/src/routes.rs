// Copyright (c) 2025 sbksba
//
// This software is licensed under the terms of the MIT License.
// See the LICENSE file in the project root for the full license text.
use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, patch, post},
};
use tower_http::trace::TraceLayer;

/// Creates and configures the application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/tasks", get(handlers::list_tasks).post(handlers::create_task))
        .route("/api/tasks/stats", get(handlers::task_stats))
        // Runs one evaluation cycle of the recurring templates
        .route("/api/tasks/recurrence/evaluate", post(handlers::evaluate_recurrence))
        .route("/api/tasks/{id}", get(handlers::get_task).delete(handlers::delete_task))
        .route("/api/tasks/{id}/completion", patch(handlers::update_completion))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
