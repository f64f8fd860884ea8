// Copyright (c) 2025 sbksba
//
// This software is licensed under the terms of the MIT License.
// See the LICENSE file in the project root for the full license text.

//! Recurring task generation.
//!
//! [`evaluate`] looks at every template task and decides whether a new
//! occurrence is due at `now`. It performs no I/O: the caller persists the
//! returned creation requests and watermark updates.
//!
//! The watermark is advanced to the evaluation time rather than to the
//! computed due date, so a template that missed several periods produces a
//! single occurrence, not one per missed period.
use std::collections::BTreeMap;

use chrono::{DateTime, Days, Months, Utc};
use tracing::{debug, warn};

use crate::{RecurrenceType, Task, TaskCreationRequest, TaskId};

/// Output of one evaluation: what to create and which watermarks to move.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Evaluation {
    pub to_create: Vec<TaskCreationRequest>,
    pub to_update_watermark: BTreeMap<TaskId, DateTime<Utc>>,
}

impl Evaluation {
    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty() && self.to_update_watermark.is_empty()
    }

    /// Applies the watermark updates to an in-memory task list.
    /// A watermark is never moved backwards.
    pub fn apply_watermarks(&self, tasks: &mut [Task]) {
        for task in tasks.iter_mut() {
            let Some(watermark) = self.to_update_watermark.get(&task.id) else {
                continue;
            };
            if let Some(rule) = task.recurring.as_mut() {
                if rule.last_generated.is_none_or(|prev| prev <= *watermark) {
                    rule.last_generated = Some(*watermark);
                }
            }
        }
    }
}

/// Moves `anchor` forward by `interval` units of `kind`.
///
/// Monthly steps keep the day of month when it exists in the target month
/// and clamp to the month's last day otherwise (Jan 31 -> Feb 28/29).
/// An interval below 1 counts as 1. Returns `None` on calendar overflow.
pub fn advance(
    anchor: DateTime<Utc>,
    kind: RecurrenceType,
    interval: i64,
) -> Option<DateTime<Utc>> {
    let steps = u32::try_from(interval.max(1)).ok()?;
    match kind {
        RecurrenceType::Daily => anchor.checked_add_days(Days::new(u64::from(steps))),
        RecurrenceType::Weekly => anchor.checked_add_days(Days::new(u64::from(steps) * 7)),
        RecurrenceType::Monthly => anchor.checked_add_months(Months::new(steps)),
    }
}

/// When the next occurrence of `task` falls due, ignoring `end_date`.
pub fn next_due(task: &Task) -> Option<DateTime<Utc>> {
    let rule = task.recurring.as_ref()?;
    let anchor = rule.last_generated.unwrap_or(task.created_at);
    advance(anchor, rule.kind, rule.interval)
}

/// Computes the occurrences due at `now` for every active template in `tasks`.
///
/// Completed templates are paused and skipped. Occurrences (tasks with a
/// `template_id`) are never evaluated. At most one occurrence is produced
/// per template.
pub fn evaluate(tasks: &[Task], now: DateTime<Utc>) -> Evaluation {
    let mut evaluation = Evaluation::default();

    for task in tasks.iter().filter(|t| t.is_template() && !t.completed) {
        let Some(rule) = task.recurring.as_ref() else {
            continue;
        };
        if evaluation.to_update_watermark.contains_key(&task.id) {
            continue;
        }
        if rule.interval < 1 {
            warn!(
                "Task {} has recurrence interval {}; treating it as 1.",
                task.id, rule.interval
            );
        }

        let Some(due) = next_due(task) else {
            warn!(
                "Task {}: next {} occurrence is out of calendar range, skipping.",
                task.id, rule.kind
            );
            continue;
        };

        if rule.end_date.is_some_and(|end| due >= end) {
            debug!("Task {}: next occurrence {} reaches the end date.", task.id, due);
            continue;
        }
        if due > now {
            debug!("Task {}: next occurrence {} is not due yet.", task.id, due);
            continue;
        }

        debug!("Task {}: occurrence due on {}.", task.id, due);
        evaluation.to_create.push(occurrence_of(task, due));
        evaluation.to_update_watermark.insert(task.id, now);
    }

    evaluation
}

fn occurrence_of(template: &Task, due_date: DateTime<Utc>) -> TaskCreationRequest {
    TaskCreationRequest {
        title: template.title.clone(),
        description: template.description.clone(),
        category: template.category,
        priority: template.priority,
        due_date,
        completed: false,
        assigned_to: template.assigned_to.clone(),
        tags: template.tags.clone(),
        recurring: template.recurring.clone(),
        template_id: Some(template.id),
    }
}
