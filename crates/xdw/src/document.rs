//! Workflow document model and YAML translation helpers.
//!
//! A workflow document is one patient's enrolment in a pathway. It is created from a
//! [`WorkflowDefinition`](crate::WorkflowDefinition) and then only ever mutated by reconciliation
//! in `xdw-core`. The persisted form is YAML; parsing is strict so that a document written by a
//! newer engine is rejected rather than silently truncated.

use crate::definition::AccessType;
use crate::{schema_mismatch, XdwError, XdwResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Status vocabularies
// ============================================================================

/// Lifecycle status of a workflow instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStatus {
    Open,
    InProgress,
    Closed,
}

/// Lifecycle status of a single task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Created,
    InProgress,
    Complete,
}

/// Status recorded on a task history entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskEventStatus {
    /// The task was created with the document.
    Created,
    /// An external event was applied to the task.
    Recorded,
}

impl WorkflowStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowStatus::Open => "OPEN",
            WorkflowStatus::InProgress => "IN_PROGRESS",
            WorkflowStatus::Closed => "CLOSED",
        }
    }

    /// Open and in-progress instances are still active.
    pub fn is_active(self) -> bool {
        !matches!(self, WorkflowStatus::Closed)
    }
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Created => "CREATED",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::Complete => "COMPLETE",
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowStatus {
    type Err = XdwError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            // CREATED is accepted from the broader wire vocabulary and treated as OPEN.
            "OPEN" | "CREATED" => Ok(WorkflowStatus::Open),
            "IN_PROGRESS" => Ok(WorkflowStatus::InProgress),
            "CLOSED" | "COMPLETE" => Ok(WorkflowStatus::Closed),
            other => Err(XdwError::InvalidInput(format!(
                "unknown workflow status: {other}"
            ))),
        }
    }
}

// ============================================================================
// Document model
// ============================================================================

/// Root/extension identifier triple used for the document, patient and author.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Identifier {
    pub root: String,
    pub extension: String,
    pub assigning_authority_name: String,
}

/// Author of the document (the clinician who enrolled the patient).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DocumentAuthor {
    pub id: Identifier,
    /// Person name (the requesting user).
    pub family: String,
    /// Role prefix of the requesting user.
    pub prefix: String,
}

/// One workflow instance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkflowDocument {
    pub id: Identifier,
    pub effective_time: DateTime<Utc>,
    pub confidentiality_code: String,
    pub patient: Identifier,
    pub author: DocumentAuthor,
    pub workflow_instance_id: String,
    pub sequence_number: u64,
    pub workflow_status: WorkflowStatus,
    pub status_history: Vec<DocumentEvent>,
    pub definition_reference: String,
    pub tasks: Vec<XdwTask>,
}

/// Entry in the workflow status history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DocumentEvent {
    pub event_time: DateTime<Utc>,
    pub event_type: String,
    pub task_event_identifier: String,
    pub author: String,
    pub previous_status: Option<WorkflowStatus>,
    pub actual_status: WorkflowStatus,
}

/// A task within the instance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct XdwTask {
    pub details: TaskDetails,
    pub description: String,
    pub inputs: Vec<Part>,
    pub outputs: Vec<Part>,
    pub event_history: Vec<TaskEvent>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskDetails {
    pub id: String,
    pub task_type: String,
    pub name: String,
    pub status: TaskStatus,
    pub actual_owner: String,
    pub created_time: DateTime<Utc>,
    pub created_by: String,
    pub activation_time: Option<DateTime<Utc>>,
    pub last_modified_time: DateTime<Utc>,
}

/// A named input or output slot and what is attached to it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Part {
    pub name: String,
    pub attachment: AttachmentInfo,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AttachmentInfo {
    /// Registry id or event-service back-reference; empty until something is attached.
    pub identifier: String,
    pub access_type: AccessType,
    pub content_type: String,
    pub attached_time: Option<DateTime<Utc>>,
    pub attached_by: String,
    pub home_community_id: String,
}

/// Entry in a task's event history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskEvent {
    /// Store id of the applied event; `None` for the creation entry.
    pub id: Option<u64>,
    pub event_time: DateTime<Utc>,
    /// Id of the task the entry belongs to.
    pub identifier: String,
    pub event_type: String,
    pub status: TaskEventStatus,
}

// ============================================================================
// Navigation helpers
// ============================================================================

impl WorkflowDocument {
    /// Look up a task by its stable string id.
    pub fn task(&self, id: &str) -> Option<&XdwTask> {
        self.tasks.iter().find(|t| t.details.id == id)
    }

    pub fn task_mut(&mut self, id: &str) -> Option<&mut XdwTask> {
        self.tasks.iter_mut().find(|t| t.details.id == id)
    }

    /// Whether an event id has already been recorded against any task.
    pub fn has_recorded(&self, event_id: u64) -> bool {
        self.tasks.iter().any(|t| t.has_recorded(event_id))
    }

    /// Status recorded by the most recent history entry, falling back to the current status.
    pub fn last_recorded_status(&self) -> WorkflowStatus {
        self.status_history
            .last()
            .map(|e| e.actual_status)
            .unwrap_or(self.workflow_status)
    }

    /// Time of the most recent task event, or the creation time if nothing has happened since.
    ///
    /// Closure itself is not a task event, so an instance reconciled late keeps the time its
    /// last artefact actually arrived.
    pub fn latest_event_time(&self) -> DateTime<Utc> {
        self.tasks
            .iter()
            .flat_map(|t| t.event_history.iter().map(|e| e.event_time))
            .fold(self.effective_time, |a, b| a.max(b))
    }

    pub fn all_tasks_complete(&self) -> bool {
        self.tasks
            .iter()
            .all(|t| t.details.status == TaskStatus::Complete)
    }
}

impl XdwTask {
    /// Inputs first, then outputs, in declaration order.
    pub fn parts(&self) -> impl Iterator<Item = &Part> {
        self.inputs.iter().chain(self.outputs.iter())
    }

    pub fn input(&self, name: &str) -> Option<&Part> {
        self.inputs.iter().find(|p| p.name == name)
    }

    pub fn output(&self, name: &str) -> Option<&Part> {
        self.outputs.iter().find(|p| p.name == name)
    }

    /// First part (inputs before outputs) with the given name.
    pub fn part_mut(&mut self, name: &str) -> Option<&mut Part> {
        self.inputs
            .iter_mut()
            .chain(self.outputs.iter_mut())
            .find(|p| p.name == name)
    }

    pub fn has_recorded(&self, event_id: u64) -> bool {
        self.event_history.iter().any(|e| e.id == Some(event_id))
    }

    /// The most recently attached part across inputs and outputs.
    ///
    /// Ties on attached time go to the part declared first, inputs before outputs.
    pub fn latest_attached(&self) -> Option<&Part> {
        let mut latest: Option<(&Part, DateTime<Utc>)> = None;
        for part in self.parts() {
            let Some(attached) = part.attachment.attached_time else {
                continue;
            };
            match latest {
                Some((_, current)) if attached <= current => {}
                _ => latest = Some((part, attached)),
            }
        }
        latest.map(|(part, _)| part)
    }

    /// Time of the most recent entry in this task's history.
    pub fn latest_event_time(&self) -> DateTime<Utc> {
        self.event_history
            .iter()
            .map(|e| e.event_time)
            .fold(self.details.created_time, |a, b| a.max(b))
    }
}

impl Part {
    pub fn is_attached(&self) -> bool {
        self.attachment.attached_time.is_some()
    }
}

// ============================================================================
// Public Document operations
// ============================================================================

/// Workflow document operations.
///
/// This is a zero-sized type used for namespacing document-related operations.
pub struct Document;

impl Document {
    /// Parse a workflow document from YAML text.
    ///
    /// This uses `serde_path_to_error` to surface a best-effort "path" (e.g.
    /// `tasks[0].details.status`) to the failing field.
    ///
    /// # Errors
    ///
    /// Returns [`XdwError`] if the YAML does not match the document schema or contains unknown
    /// keys.
    pub fn parse(yaml_text: &str) -> XdwResult<WorkflowDocument> {
        let deserializer = serde_yaml::Deserializer::from_str(yaml_text);
        serde_path_to_error::deserialize::<_, WorkflowDocument>(deserializer)
            .map_err(|e| schema_mismatch("Workflow document", e))
    }

    /// Render a workflow document as YAML text.
    ///
    /// Rendering is deterministic: equal documents always render to identical bytes.
    ///
    /// # Errors
    ///
    /// Returns [`XdwError`] if serialization fails.
    pub fn render(document: &WorkflowDocument) -> XdwResult<String> {
        serde_yaml::to_string(document)
            .map_err(|e| XdwError::Translation(format!("Failed to serialize workflow document: {e}")))
    }
}
