// Copyright (c) 2025 sbksba
//
// This software is licensed under the terms of the MIT License.
// See the LICENSE file in the project root for the full license text.
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod recurrence;
pub mod stats;

pub use recurrence::{Evaluation, advance, evaluate, next_due};
pub use stats::TaskStats;

/// Identifier assigned by the task store on creation.
pub type TaskId = i64;

/// Classification of a task. It is only a label: the recurrence rule,
/// not the category, decides when occurrences are generated.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default, sqlx::Type)]
#[serde(rename_all = "kebab-case")]
#[sqlx(rename_all = "kebab-case")]
pub enum TaskCategory {
    Daily,
    Weekly,
    Monthly,
    #[default]
    OneTime,
}

/// Priority of a task, ordered from `Low` to `Urgent`.
#[derive(
    Serialize,
    Deserialize,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Default,
    sqlx::Type,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

/// Calendar granularity of a recurrence rule.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RecurrenceType {
    Daily,
    Weekly,
    Monthly,
}

impl RecurrenceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecurrenceType::Daily => "daily",
            RecurrenceType::Weekly => "weekly",
            RecurrenceType::Monthly => "monthly",
        }
    }
}

impl fmt::Display for RecurrenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown recurrence type '{0}' (expected daily, weekly or monthly)")]
pub struct UnknownRecurrenceType(pub String);

impl FromStr for RecurrenceType {
    type Err = UnknownRecurrenceType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "daily" => Ok(RecurrenceType::Daily),
            "weekly" => Ok(RecurrenceType::Weekly),
            "monthly" => Ok(RecurrenceType::Monthly),
            other => Err(UnknownRecurrenceType(other.to_string())),
        }
    }
}

/// Describes how a template task spawns future occurrences.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RecurrenceRule {
    #[serde(rename = "type")]
    pub kind: RecurrenceType,

    /// "Every N units". Must be at least 1.
    pub interval: i64,

    /// Once the next occurrence would fall at or after this instant,
    /// no further occurrences are generated.
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,

    /// Watermark: the last time this rule produced an occurrence.
    #[serde(default)]
    pub last_generated: Option<DateTime<Utc>>,
}

impl RecurrenceRule {
    pub fn new(kind: RecurrenceType, interval: i64) -> Self {
        Self {
            kind,
            interval,
            end_date: None,
            last_generated: None,
        }
    }

    pub fn with_end_date(mut self, end_date: DateTime<Utc>) -> Self {
        self.end_date = Some(end_date);
        self
    }

    pub fn with_last_generated(mut self, last_generated: DateTime<Utc>) -> Self {
        self.last_generated = Some(last_generated);
        self
    }
}

/// A unit of work, as held by the task store.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub description: String,
    pub category: TaskCategory,
    pub priority: TaskPriority,
    pub due_date: DateTime<Utc>,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub assigned_to: Option<String>,
    pub tags: BTreeSet<String>,
    pub recurring: Option<RecurrenceRule>,

    /// Set on occurrences: the template that generated this task.
    pub template_id: Option<TaskId>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// A template carries a rule and was not itself generated from one.
    pub fn is_template(&self) -> bool {
        self.recurring.is_some() && self.template_id.is_none()
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        !self.completed && self.due_date < now
    }
}

/// Everything needed to create a task. The store assigns `id`,
/// `created_at` and `updated_at`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TaskCreationRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: TaskCategory,
    #[serde(default)]
    pub priority: TaskPriority,
    pub due_date: DateTime<Utc>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub assigned_to: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub recurring: Option<RecurrenceRule>,
    /// Set only by the recurrence engine; never read from a client body.
    #[serde(default, skip_deserializing)]
    pub template_id: Option<TaskId>,
}

impl TaskCreationRequest {
    pub fn new(title: impl Into<String>, due_date: DateTime<Utc>) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            category: TaskCategory::default(),
            priority: TaskPriority::default(),
            due_date,
            completed: false,
            assigned_to: None,
            tags: BTreeSet::new(),
            recurring: None,
            template_id: None,
        }
    }

    /// Checks the request before it reaches the store.
    ///
    /// Rules with an interval below 1 are rejected here so that the
    /// recurrence engine never has to make sense of them.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.title.trim().is_empty() {
            return Err(ValidationError::EmptyTitle);
        }
        if self.tags.iter().any(|tag| tag.trim().is_empty()) {
            return Err(ValidationError::BlankTag);
        }
        if let Some(rule) = &self.recurring {
            if rule.interval < 1 {
                return Err(ValidationError::InvalidInterval(rule.interval));
            }
            if let Some(end_date) = rule.end_date {
                if end_date <= self.due_date {
                    return Err(ValidationError::EndDateBeforeDue {
                        end_date,
                        due_date: self.due_date,
                    });
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Task title cannot be empty.")]
    EmptyTitle,
    #[error("Tags cannot be blank.")]
    BlankTag,
    #[error("Recurrence interval must be at least 1 (got {0}).")]
    InvalidInterval(i64),
    #[error("Recurrence end date {end_date} must be after the due date {due_date}.")]
    EndDateBeforeDue {
        end_date: DateTime<Utc>,
        due_date: DateTime<Utc>,
    },
}
