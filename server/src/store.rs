// Copyright (c) 2025 sbksba
//
// This software is licensed under the terms of the MIT License.
// See the LICENSE file in the project root for the full license text.
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Task, TaskCreationRequest, TaskId};

/// Result of trying to persist a generated occurrence.
#[derive(Debug)]
pub enum OccurrenceOutcome {
    /// The watermark was advanced and the occurrence inserted.
    Created(Task),
    /// The template's watermark moved since it was read (another cycle got
    /// there first), or the template is gone or completed. Nothing was written.
    Conflict,
}

/// Persistent record store for tasks.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn list_tasks(&self) -> Result<Vec<Task>>;

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>>;

    /// Inserts a task, assigning its id and timestamps.
    async fn create_task(&self, req: TaskCreationRequest) -> Result<Task>;

    /// Moves the recurrence watermark of a template forward.
    /// Returns `false` if the task does not exist, has no rule, or the new
    /// value would move the watermark backwards.
    async fn update_task_watermark(
        &self,
        id: TaskId,
        last_generated: DateTime<Utc>,
    ) -> Result<bool>;

    async fn update_task_completion(
        &self,
        id: TaskId,
        completed: bool,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<bool>;

    async fn delete_task(&self, id: TaskId) -> Result<bool>;

    /// Advances the template watermark from `expected_watermark` to
    /// `watermark` and inserts `req`, as a single transaction.
    async fn record_occurrence(
        &self,
        template_id: TaskId,
        expected_watermark: Option<DateTime<Utc>>,
        req: TaskCreationRequest,
        watermark: DateTime<Utc>,
    ) -> Result<OccurrenceOutcome>;
}
