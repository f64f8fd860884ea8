// Copyright (c) 2025 sbksba
//
// This software is licensed under the terms of the MIT License.
// See the LICENSE file in the project root for the full license text.
use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use common::{Evaluation, Task, TaskId, evaluate};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::store::{OccurrenceOutcome, TaskStore};

/// What one evaluation cycle did.
#[derive(Debug, Serialize)]
pub struct CycleReport {
    pub evaluated_at: DateTime<Utc>,
    pub templates_due: usize,
    pub created: Vec<Task>,
    /// Templates another cycle advanced first.
    pub conflicts: Vec<TaskId>,
    /// Templates whose writes failed; they are retried on the next cycle.
    pub failures: Vec<TaskId>,
}

/// Reads every task, evaluates the recurrence rules at `now` and persists
/// the result, one template at a time.
///
/// Each occurrence is written together with its watermark through
/// [`TaskStore::record_occurrence`], using the watermark observed when the
/// tasks were listed. A failing template does not stop the others.
pub async fn run_evaluation_cycle(
    store: &dyn TaskStore,
    now: DateTime<Utc>,
) -> Result<CycleReport> {
    let tasks = store.list_tasks().await?;
    let observed: HashMap<TaskId, Option<DateTime<Utc>>> = tasks
        .iter()
        .map(|t| (t.id, t.recurring.as_ref().and_then(|r| r.last_generated)))
        .collect();

    let Evaluation {
        to_create,
        to_update_watermark,
    } = evaluate(&tasks, now);

    let mut report = CycleReport {
        evaluated_at: now,
        templates_due: to_update_watermark.len(),
        created: Vec::new(),
        conflicts: Vec::new(),
        failures: Vec::new(),
    };

    for request in to_create {
        let Some(template_id) = request.template_id else {
            continue;
        };
        let Some(&watermark) = to_update_watermark.get(&template_id) else {
            continue;
        };
        let expected = observed.get(&template_id).copied().flatten();

        match store
            .record_occurrence(template_id, expected, request, watermark)
            .await
        {
            Ok(OccurrenceOutcome::Created(task)) => {
                debug!(
                    "Template {} produced task {} due on {}.",
                    template_id, task.id, task.due_date
                );
                report.created.push(task);
            }
            Ok(OccurrenceOutcome::Conflict) => {
                warn!(
                    "Template {} was advanced concurrently, occurrence skipped.",
                    template_id
                );
                report.conflicts.push(template_id);
            }
            Err(e) => {
                error!("Failed to persist occurrence of template {}: {:?}", template_id, e);
                report.failures.push(template_id);
            }
        }
    }

    info!(
        "Evaluation at {}: {} templates due, {} occurrences created, {} conflicts, {} failures.",
        now,
        report.templates_due,
        report.created.len(),
        report.conflicts.len(),
        report.failures.len()
    );

    Ok(report)
}
