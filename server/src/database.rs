// Copyright (c) 2025 sbksba
//
// This software is licensed under the terms of the MIT License.
// See the LICENSE file in the project root for the full license text.
use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{
    RecurrenceRule, RecurrenceType, Task, TaskCategory, TaskCreationRequest, TaskId, TaskPriority,
};
use sqlx::{Sqlite, SqliteConnection, SqlitePool, migrate::MigrateDatabase};
use tracing::{debug, info, warn};

use crate::store::{OccurrenceOutcome, TaskStore};

const CREATE_TASKS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS tasks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        title TEXT NOT NULL,
        description TEXT NOT NULL,
        category TEXT NOT NULL,
        priority TEXT NOT NULL,
        due_date TIMESTAMP NOT NULL,
        completed BOOLEAN NOT NULL DEFAULT 0,
        completed_at TIMESTAMP NULL,
        assigned_to TEXT NULL,
        tags TEXT NOT NULL DEFAULT '[]',
        recurrence_type TEXT NULL,
        recurrence_interval INTEGER NULL,
        recurrence_end_date TIMESTAMP NULL,
        recurrence_last_generated TIMESTAMP NULL,
        template_id INTEGER NULL,
        created_at TIMESTAMP NOT NULL,
        updated_at TIMESTAMP NOT NULL
    );
"#;

/// Establishes the database connection pool.
/// If the database does not exist, it creates it.
/// It also ensures the `tasks` table has the correct schema.
pub async fn establish_connection_pool(database_url: &str) -> Result<SqlitePool> {
    if let Some(parent) = database_file(database_url).and_then(|p| p.parent()) {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
    }

    if !Sqlite::database_exists(database_url).await.unwrap_or(false) {
        info!("Creating database {}", database_url);
        Sqlite::create_database(database_url)
            .await
            .context("Failed to create database")?;
    } else {
        info!("Database already exists.");
    }

    let pool = SqlitePool::connect(database_url)
        .await
        .context("Failed to connect to database")?;

    create_schema(&pool).await?;

    Ok(pool)
}

/// File path behind a `sqlite:` URL, or `None` for in-memory databases.
fn database_file(database_url: &str) -> Option<&Path> {
    let rest = database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))?;
    let path = rest.split('?').next().unwrap_or(rest);
    if path.is_empty() || path == ":memory:" {
        return None;
    }
    Some(Path::new(path))
}

/// Creates the `tasks` table if it is missing.
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(CREATE_TASKS_TABLE)
        .execute(pool)
        .await
        .context("Failed to create 'tasks' table")?;

    info!("'tasks' table is ready.");
    Ok(())
}

/// Flat view of a `tasks` row. The recurrence rule is spread over
/// `recurrence_*` columns and tags are stored as a JSON array.
#[derive(Debug, sqlx::FromRow)]
struct TaskRow {
    id: i64,
    title: String,
    description: String,
    category: TaskCategory,
    priority: TaskPriority,
    due_date: DateTime<Utc>,
    completed: bool,
    completed_at: Option<DateTime<Utc>>,
    assigned_to: Option<String>,
    tags: String,
    recurrence_type: Option<String>,
    recurrence_interval: Option<i64>,
    recurrence_end_date: Option<DateTime<Utc>>,
    recurrence_last_generated: Option<DateTime<Utc>>,
    template_id: Option<i64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TaskRow {
    fn into_task(self) -> Task {
        let tags: BTreeSet<String> = serde_json::from_str(&self.tags).unwrap_or_else(|e| {
            warn!("Task {} has unreadable tags {:?}: {}", self.id, self.tags, e);
            BTreeSet::new()
        });

        // A rule that cannot be parsed only disables recurrence for this task.
        let recurring = match self.recurrence_type.as_deref() {
            None => None,
            Some(raw) => match raw.parse::<RecurrenceType>() {
                Ok(kind) => Some(RecurrenceRule {
                    kind,
                    interval: self.recurrence_interval.unwrap_or(1),
                    end_date: self.recurrence_end_date,
                    last_generated: self.recurrence_last_generated,
                }),
                Err(e) => {
                    warn!("Task {}: {}. Recurrence disabled.", self.id, e);
                    None
                }
            },
        };

        Task {
            id: self.id,
            title: self.title,
            description: self.description,
            category: self.category,
            priority: self.priority,
            due_date: self.due_date,
            completed: self.completed,
            completed_at: self.completed_at,
            assigned_to: self.assigned_to,
            tags,
            recurring,
            template_id: self.template_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Inserts a task on the given connection, so it can run inside a transaction.
async fn insert_task(conn: &mut SqliteConnection, req: TaskCreationRequest) -> Result<Task> {
    let now = Utc::now();
    let completed_at = req.completed.then_some(now);
    let tags = serde_json::to_string(&req.tags).context("Failed to encode task tags")?;
    let rule = req.recurring.as_ref();

    debug!(
        "Insert values: title={}, category={:?}, priority={:?}, due_date={}, \
         recurring={:?}, template_id={:?}",
        req.title,
        req.category,
        req.priority,
        req.due_date,
        req.recurring,
        req.template_id
    );

    let id = sqlx::query(
        r#"INSERT INTO tasks (
            title, description, category, priority, due_date, completed, completed_at,
            assigned_to, tags, recurrence_type, recurrence_interval, recurrence_end_date,
            recurrence_last_generated, template_id, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&req.title)
    .bind(&req.description)
    .bind(req.category)
    .bind(req.priority)
    .bind(req.due_date)
    .bind(req.completed)
    .bind(completed_at)
    .bind(&req.assigned_to)
    .bind(&tags)
    .bind(rule.map(|r| r.kind.as_str()))
    .bind(rule.map(|r| r.interval))
    .bind(rule.and_then(|r| r.end_date))
    .bind(rule.and_then(|r| r.last_generated))
    .bind(req.template_id)
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await
    .context("Failed to insert task into DB")?
    .last_insert_rowid();

    Ok(Task {
        id,
        title: req.title,
        description: req.description,
        category: req.category,
        priority: req.priority,
        due_date: req.due_date,
        completed: req.completed,
        completed_at,
        assigned_to: req.assigned_to,
        tags: req.tags,
        recurring: req.recurring,
        template_id: req.template_id,
        created_at: now,
        updated_at: now,
    })
}

/// [`TaskStore`] backed by SQLite.
#[derive(Clone)]
pub struct SqliteTaskStore {
    pool: SqlitePool,
}

impl SqliteTaskStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn list_tasks(&self) -> Result<Vec<Task>> {
        let rows = sqlx::query_as::<_, TaskRow>("SELECT * FROM tasks ORDER BY due_date ASC, id ASC")
            .fetch_all(&self.pool)
            .await
            .context("Failed to retrieve tasks from DB")?;

        Ok(rows.into_iter().map(TaskRow::into_task).collect())
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>> {
        let row = sqlx::query_as::<_, TaskRow>("SELECT * FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("Failed to retrieve task with ID: {id}"))?;

        Ok(row.map(TaskRow::into_task))
    }

    async fn create_task(&self, req: TaskCreationRequest) -> Result<Task> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .context("Failed to acquire DB connection")?;
        insert_task(&mut conn, req).await
    }

    async fn update_task_watermark(
        &self,
        id: TaskId,
        last_generated: DateTime<Utc>,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        let current: Option<(Option<String>, Option<DateTime<Utc>>)> = sqlx::query_as(
            "SELECT recurrence_type, recurrence_last_generated FROM tasks WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .with_context(|| format!("Failed to read watermark of task {id}"))?;

        let previous = match current {
            Some((Some(_), previous)) => previous,
            _ => {
                debug!("Task {} has no recurrence rule, watermark not updated.", id);
                return Ok(false);
            }
        };
        if previous.is_some_and(|prev| prev > last_generated) {
            warn!(
                "Refusing to move watermark of task {} back from {:?} to {}.",
                id, previous, last_generated
            );
            return Ok(false);
        }

        let result = sqlx::query(
            "UPDATE tasks SET recurrence_last_generated = ?, updated_at = ? \
             WHERE id = ? AND recurrence_last_generated IS ?",
        )
        .bind(last_generated)
        .bind(Utc::now())
        .bind(id)
        .bind(previous)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("Failed to update watermark of task {id}"))?;

        tx.commit().await.context("Failed to commit watermark update")?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_task_completion(
        &self,
        id: TaskId,
        completed: bool,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        // Completing an already-completed task keeps its first completion time.
        let completed_at = if completed { completed_at } else { None };
        let result = sqlx::query(
            "UPDATE tasks SET completed = ?1, \
             completed_at = CASE \
                 WHEN NOT ?1 THEN NULL \
                 WHEN completed = 1 THEN COALESCE(completed_at, ?2) \
                 ELSE ?2 END, \
             updated_at = ?3 \
             WHERE id = ?4",
        )
        .bind(completed)
        .bind(completed_at)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to update completion of task {id}"))?;

        info!(
            "Set completed={} on task {} ({} rows).",
            completed,
            id,
            result.rows_affected()
        );
        Ok(result.rows_affected() > 0)
    }

    async fn delete_task(&self, id: TaskId) -> Result<bool> {
        debug!("Attempting to delete task with ID: {}", id);
        let result = sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to delete task with ID: {id}"))?;

        let rows_affected = result.rows_affected();
        info!("Deleted {} rows for task ID: {}", rows_affected, id);

        Ok(rows_affected > 0)
    }

    async fn record_occurrence(
        &self,
        template_id: TaskId,
        expected_watermark: Option<DateTime<Utc>>,
        req: TaskCreationRequest,
        watermark: DateTime<Utc>,
    ) -> Result<OccurrenceOutcome> {
        if expected_watermark.is_some_and(|prev| prev > watermark) {
            return Ok(OccurrenceOutcome::Conflict);
        }

        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        // Claim the period first: only one cycle can move the watermark
        // away from the value it observed.
        let claimed = sqlx::query(
            r#"UPDATE tasks SET recurrence_last_generated = ?, updated_at = ?
            WHERE id = ? AND completed = 0 AND recurrence_type IS NOT NULL
              AND recurrence_last_generated IS ?"#,
        )
        .bind(watermark)
        .bind(Utc::now())
        .bind(template_id)
        .bind(expected_watermark)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("Failed to claim watermark of template {template_id}"))?
        .rows_affected();

        if claimed == 0 {
            tx.rollback().await.context("Failed to roll back transaction")?;
            return Ok(OccurrenceOutcome::Conflict);
        }

        let task = insert_task(&mut tx, req).await?;
        tx.commit().await.context("Failed to commit occurrence")?;

        Ok(OccurrenceOutcome::Created(task))
    }
}
