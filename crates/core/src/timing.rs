//! Completion targets, overdue flags and durations.
//!
//! Definitions express targets as periods relative to creation, `<unit>(<n>)` with unit one of
//! `min`, `hour`, `day` or `month`. A period that does not parse means there is no target: the
//! instance is never overdue and its completion date is reported as "Non Specified".

use crate::constants::NON_SPECIFIED;
use chrono::{DateTime, Duration, Months, Utc};
use serde::Serialize;
use std::collections::HashMap;
use xdw::{TaskStatus, WorkflowDefinition, WorkflowDocument, WorkflowStatus, XdwTask};

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum PeriodError {
    #[error("period {0:?} is not of the form unit(n)")]
    Syntax(String),
    #[error("unknown period unit {0:?}")]
    UnknownUnit(String),
    #[error("invalid period amount {0:?}")]
    Amount(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeriodUnit {
    Minute,
    Hour,
    Day,
    Month,
}

/// An offset from a start time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Period {
    pub unit: PeriodUnit,
    pub amount: u32,
}

impl Period {
    pub fn parse(text: &str) -> Result<Self, PeriodError> {
        let text = text.trim();
        let (unit, rest) = text
            .split_once('(')
            .ok_or_else(|| PeriodError::Syntax(text.to_string()))?;
        let amount = rest
            .strip_suffix(')')
            .ok_or_else(|| PeriodError::Syntax(text.to_string()))?
            .trim();

        let unit = match unit.trim() {
            "min" => PeriodUnit::Minute,
            "hour" => PeriodUnit::Hour,
            "day" => PeriodUnit::Day,
            "month" => PeriodUnit::Month,
            other => return Err(PeriodError::UnknownUnit(other.to_string())),
        };
        let amount = amount
            .parse::<u32>()
            .map_err(|_| PeriodError::Amount(amount.to_string()))?;

        Ok(Self { unit, amount })
    }

    /// `start` plus this period, or `None` if the result is out of range.
    pub fn target_from(&self, start: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let amount = i64::from(self.amount);
        match self.unit {
            PeriodUnit::Minute => start.checked_add_signed(Duration::minutes(amount)),
            PeriodUnit::Hour => start.checked_add_signed(Duration::hours(amount)),
            PeriodUnit::Day => start.checked_add_signed(Duration::days(amount)),
            PeriodUnit::Month => start.checked_add_months(Months::new(self.amount)),
        }
    }
}

/// Target time for an optional period expression, logging expressions that do not parse.
pub fn target_time(period: Option<&str>, start: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let period = period?;
    match Period::parse(period) {
        Ok(p) => p.target_from(start),
        Err(err) => {
            tracing::warn!("ignoring completion period: {err}");
            None
        }
    }
}

/// Render an elapsed duration as days, hours and minutes.
///
/// Less than one whole minute renders as "less than a minute". Otherwise the largest non-zero
/// unit and every smaller unit are shown, e.g. `1 hour 0 mins` or `2 days 3 hours 1 min`.
pub fn pretty_duration(elapsed: Duration) -> String {
    let total = elapsed.num_minutes().max(0);
    if total == 0 {
        return "less than a minute".to_string();
    }

    let days = total / (24 * 60);
    let hours = (total % (24 * 60)) / 60;
    let minutes = total % 60;

    let plural = |n: i64, unit: &str| {
        if n == 1 {
            format!("{n} {unit}")
        } else {
            format!("{n} {unit}s")
        }
    };

    let mut parts = Vec::new();
    if days > 0 {
        parts.push(plural(days, "day"));
    }
    if days > 0 || hours > 0 {
        parts.push(plural(hours, "hour"));
    }
    parts.push(plural(minutes, "min"));
    parts.join(" ")
}

/// Time left until `target`; `"0"` once it has passed, "Non Specified" without a target.
pub fn time_remaining(target: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    match target {
        None => NON_SPECIFIED.to_string(),
        Some(target) if now >= target => "0".to_string(),
        Some(target) => pretty_duration(target - now),
    }
}

/// Overdue rule shared by workflows and tasks.
///
/// Finished items are judged by when they last changed; unfinished items by `now`. An item that
/// finished before its target is therefore never overdue, however late it is queried.
pub fn is_overdue(
    finished: bool,
    target: Option<DateTime<Utc>>,
    last_change: DateTime<Utc>,
    now: DateTime<Utc>,
) -> bool {
    let Some(target) = target else {
        return false;
    };
    if finished {
        last_change > target
    } else {
        now > target
    }
}

/// Workflow completion target, from the definition's completion-by period.
pub fn workflow_target(
    document: &WorkflowDocument,
    definition: &WorkflowDefinition,
) -> Option<DateTime<Utc>> {
    target_time(definition.complete_by.as_deref(), document.effective_time)
}

pub fn is_workflow_overdue(
    document: &WorkflowDocument,
    definition: &WorkflowDefinition,
    now: DateTime<Utc>,
) -> bool {
    is_overdue(
        document.workflow_status == WorkflowStatus::Closed,
        workflow_target(document, definition),
        document.latest_event_time(),
        now,
    )
}

/// Read state of a workflow instance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WorkflowState {
    pub created: DateTime<Utc>,
    pub complete_by: Option<DateTime<Utc>>,
    pub status: WorkflowStatus,
    pub is_published: bool,
    pub is_overdue: bool,
    pub latest_event_time: DateTime<Utc>,
    pub duration_minutes: i64,
    pub pretty_duration: String,
    pub time_remaining: String,
}

impl WorkflowState {
    pub fn complete_by_label(&self) -> String {
        self.complete_by
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| NON_SPECIFIED.to_string())
    }
}

/// Compute the read state of an instance at `now`.
///
/// Elapsed time runs from creation to `now` while the instance is open and to its latest task
/// event once closed.
pub fn workflow_state(
    document: &WorkflowDocument,
    definition: &WorkflowDefinition,
    published: bool,
    now: DateTime<Utc>,
) -> WorkflowState {
    let closed = document.workflow_status == WorkflowStatus::Closed;
    let latest = document.latest_event_time();
    let target = workflow_target(document, definition);
    let end = if closed { latest } else { now };
    let elapsed = (end - document.effective_time).max(Duration::zero());

    WorkflowState {
        created: document.effective_time,
        complete_by: target,
        status: document.workflow_status,
        is_published: published,
        is_overdue: is_overdue(closed, target, latest, now),
        latest_event_time: latest,
        duration_minutes: elapsed.num_minutes(),
        pretty_duration: pretty_duration(elapsed),
        time_remaining: if closed {
            "0".to_string()
        } else {
            time_remaining(target, now)
        },
    }
}

/// Read state of one task.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TaskState {
    pub task_id: String,
    pub name: String,
    pub status: TaskStatus,
    pub created: DateTime<Utc>,
    pub complete_by: Option<DateTime<Utc>>,
    pub is_overdue: bool,
    pub latest_event_time: DateTime<Utc>,
    pub pretty_duration: String,
    pub notes: Vec<String>,
}

/// Task completion target: the task's own period from its creation, else the workflow target.
pub fn task_target(
    task: &XdwTask,
    definition: &WorkflowDefinition,
    workflow_target: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    definition
        .task(&task.details.id)
        .and_then(|t| target_time(t.complete_by.as_deref(), task.details.created_time))
        .or(workflow_target)
}

/// Per-task read state, in document order.
pub fn task_states(
    document: &WorkflowDocument,
    definition: &WorkflowDefinition,
    notes: &HashMap<String, Vec<String>>,
    now: DateTime<Utc>,
) -> Vec<TaskState> {
    let workflow_target = workflow_target(document, definition);
    document
        .tasks
        .iter()
        .map(|task| {
            let complete = task.details.status == TaskStatus::Complete;
            let target = task_target(task, definition, workflow_target);
            let end = if complete {
                task.details.last_modified_time
            } else {
                now
            };
            let elapsed = (end - task.details.created_time).max(Duration::zero());

            TaskState {
                task_id: task.details.id.clone(),
                name: task.details.name.clone(),
                status: task.details.status,
                created: task.details.created_time,
                complete_by: target,
                is_overdue: is_overdue(complete, target, task.details.last_modified_time, now),
                latest_event_time: task.latest_event_time(),
                pretty_duration: pretty_duration(elapsed),
                notes: notes.get(&task.details.id).cloned().unwrap_or_default(),
            }
        })
        .collect()
}
