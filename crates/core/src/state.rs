//! Task and workflow state machines.
//!
//! Task: `CREATED -> IN_PROGRESS -> COMPLETE`, where a task may also be completed straight from
//! `CREATED` (by a condition on other tasks or by workflow closure). `COMPLETE` is terminal.
//!
//! Workflow: `OPEN -> IN_PROGRESS -> CLOSED`, where `OPEN -> CLOSED` is allowed when closure is
//! reached without any applied event. `CLOSED` is terminal.

use chrono::{DateTime, Utc};
use xdw::{TaskStatus, WorkflowDocument, WorkflowStatus, XdwTask};

/// Allowed forward transitions of a status vocabulary.
pub trait StatusTransition: Copy + PartialEq {
    fn can_transition_to(self, next: Self) -> bool;

    fn is_terminal(self) -> bool;
}

impl StatusTransition for TaskStatus {
    fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Created, TaskStatus::InProgress)
                | (TaskStatus::Created, TaskStatus::Complete)
                | (TaskStatus::InProgress, TaskStatus::Complete)
        )
    }

    fn is_terminal(self) -> bool {
        self == TaskStatus::Complete
    }
}

impl StatusTransition for WorkflowStatus {
    fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (WorkflowStatus::Open, WorkflowStatus::InProgress)
                | (WorkflowStatus::Open, WorkflowStatus::Closed)
                | (WorkflowStatus::InProgress, WorkflowStatus::Closed)
        )
    }

    fn is_terminal(self) -> bool {
        self == WorkflowStatus::Closed
    }
}

/// Mark a task as started by an event at `at`.
///
/// The activation time is only set the first time. Returns `true` if the status changed.
pub fn start_task(task: &mut XdwTask, at: DateTime<Utc>) -> bool {
    if task.details.activation_time.is_none() {
        task.details.activation_time = Some(at);
    }
    transition_task(task, TaskStatus::InProgress)
}

/// Complete a task. Returns `true` if the status changed.
pub fn complete_task(task: &mut XdwTask) -> bool {
    transition_task(task, TaskStatus::Complete)
}

fn transition_task(task: &mut XdwTask, next: TaskStatus) -> bool {
    if !task.details.status.can_transition_to(next) {
        return false;
    }
    tracing::debug!(
        task = %task.details.id,
        "task {} -> {}",
        task.details.status,
        next
    );
    task.details.status = next;
    true
}

/// Move an open workflow to in-progress. Returns the status the workflow is in afterwards.
pub fn advance_workflow(document: &mut WorkflowDocument) -> WorkflowStatus {
    if document
        .workflow_status
        .can_transition_to(WorkflowStatus::InProgress)
    {
        document.workflow_status = WorkflowStatus::InProgress;
    }
    document.workflow_status
}

/// Close a workflow and force every task to COMPLETE.
///
/// Returns the ids of tasks that were forced complete, or `None` if the workflow was already
/// closed.
pub fn close_workflow(document: &mut WorkflowDocument) -> Option<Vec<String>> {
    if !document
        .workflow_status
        .can_transition_to(WorkflowStatus::Closed)
    {
        return None;
    }
    document.workflow_status = WorkflowStatus::Closed;

    let forced = document
        .tasks
        .iter_mut()
        .filter_map(|task| complete_task(task).then(|| task.details.id.clone()))
        .collect();
    Some(forced)
}
