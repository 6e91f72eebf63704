//! Store access.
//!
//! The engine persists four collections: definitions (including XDS metadata companions),
//! workflow rows, events and cross-reference id maps. Each collection gets its own typed
//! operations; there is no generic query builder.
//!
//! Versioning: the current row and events of a `(pathway, patient)` key carry
//! [`CURRENT_VERSION`](crate::constants::CURRENT_VERSION). Deprecation increments the version of
//! every row or event for the key, so superseded instances are kept, never deleted.

mod memory;

pub use memory::InMemoryStore;

use crate::constants::CURRENT_VERSION;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use xdw::WorkflowStatus;
use xdw_types::{PatientId, Pathway};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("store backend failure: {0}")]
    Backend(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Identity of a workflow instance.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowKey {
    pub pathway: Pathway,
    pub patient: PatientId,
}

impl WorkflowKey {
    pub fn new(pathway: Pathway, patient: PatientId) -> Self {
        Self { pathway, patient }
    }
}

impl std::fmt::Display for WorkflowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.pathway, self.patient)
    }
}

// ============================================================================
// Definitions
// ============================================================================

/// A registered definition or XDS metadata companion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefinitionRow {
    pub id: u64,
    /// Pathway name for definitions, `<pathway>_meta` for metadata companions.
    pub name: String,
    pub is_xds_meta: bool,
    pub payload: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewDefinition {
    pub name: String,
    pub is_xds_meta: bool,
    pub payload: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DefinitionFilter {
    pub name: Option<String>,
    pub is_xds_meta: Option<bool>,
}

impl DefinitionFilter {
    pub fn definition(pathway: &Pathway) -> Self {
        Self {
            name: Some(pathway.as_str().to_string()),
            is_xds_meta: Some(false),
        }
    }

    pub fn xds_meta(pathway: &Pathway) -> Self {
        Self {
            name: Some(pathway.meta_name()),
            is_xds_meta: Some(true),
        }
    }

    pub fn matches(&self, row: &DefinitionRow) -> bool {
        self.name.as_ref().is_none_or(|n| *n == row.name)
            && self.is_xds_meta.is_none_or(|m| m == row.is_xds_meta)
    }
}

// ============================================================================
// Workflows
// ============================================================================

/// Persisted projection of one workflow instance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowRow {
    pub id: u64,
    pub created: DateTime<Utc>,
    pub pathway: Pathway,
    pub patient: PatientId,
    pub instance_id: String,
    pub version: u32,
    /// Rendered document (YAML).
    pub document: String,
    /// Definition snapshot taken at creation (JSON).
    pub definition: String,
    pub published: bool,
    pub status: WorkflowStatus,
}

impl WorkflowRow {
    pub fn key(&self) -> WorkflowKey {
        WorkflowKey::new(self.pathway.clone(), self.patient.clone())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewWorkflow {
    pub created: DateTime<Utc>,
    pub key: WorkflowKey,
    pub instance_id: String,
    pub document: String,
    pub definition: String,
    pub status: WorkflowStatus,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WorkflowFilter {
    pub pathway: Option<Pathway>,
    pub patient: Option<PatientId>,
    pub version: Option<u32>,
    pub status: Option<WorkflowStatus>,
    pub published: Option<bool>,
}

impl WorkflowFilter {
    /// The current row of one instance.
    pub fn current(key: &WorkflowKey) -> Self {
        Self {
            pathway: Some(key.pathway.clone()),
            patient: Some(key.patient.clone()),
            version: Some(CURRENT_VERSION),
            ..Self::default()
        }
    }

    /// Current rows of one pathway, or of every pathway.
    pub fn current_for(pathway: Option<&Pathway>) -> Self {
        Self {
            pathway: pathway.cloned(),
            version: Some(CURRENT_VERSION),
            ..Self::default()
        }
    }

    pub fn matches(&self, row: &WorkflowRow) -> bool {
        self.pathway.as_ref().is_none_or(|p| *p == row.pathway)
            && self.patient.as_ref().is_none_or(|p| *p == row.patient)
            && self.version.is_none_or(|v| v == row.version)
            && self.status.is_none_or(|s| s == row.status)
            && self.published.is_none_or(|p| p == row.published)
    }
}

/// Replace the mutable columns of one workflow row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkflowUpdate {
    pub key: WorkflowKey,
    pub version: u32,
    pub document: String,
    pub published: bool,
    pub status: WorkflowStatus,
}

// ============================================================================
// Events
// ============================================================================

/// An external clinical event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: u64,
    pub creation_time: DateTime<Utc>,
    pub pathway: Pathway,
    pub patient: PatientId,
    pub task_id: String,
    /// Name of the input or output part the event fills.
    pub expression: String,
    /// Registry id of the referenced document, for registered artefacts.
    pub xds_doc_entry_uid: String,
    pub repository_unique_id: String,
    pub user: String,
    pub org: String,
    pub role: String,
    pub comments: String,
    pub version: u32,
}

impl Event {
    /// `user org role`, skipping blanks.
    pub fn author(&self) -> String {
        author_label(&[&self.user, &self.org, &self.role])
    }
}

/// An event as submitted, before the store assigns its id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEvent {
    pub creation_time: DateTime<Utc>,
    pub pathway: Pathway,
    pub patient: PatientId,
    pub task_id: String,
    pub expression: String,
    #[serde(default)]
    pub xds_doc_entry_uid: String,
    #[serde(default)]
    pub repository_unique_id: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub org: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub comments: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EventFilter {
    pub pathway: Option<Pathway>,
    pub patient: Option<PatientId>,
    pub task_id: Option<String>,
    pub version: Option<u32>,
}

impl EventFilter {
    /// Current events of one instance.
    pub fn current(key: &WorkflowKey) -> Self {
        Self {
            pathway: Some(key.pathway.clone()),
            patient: Some(key.patient.clone()),
            task_id: None,
            version: Some(CURRENT_VERSION),
        }
    }

    pub fn matches(&self, event: &Event) -> bool {
        self.pathway.as_ref().is_none_or(|p| *p == event.pathway)
            && self.patient.as_ref().is_none_or(|p| *p == event.patient)
            && self.task_id.as_ref().is_none_or(|t| *t == event.task_id)
            && self.version.is_none_or(|v| v == event.version)
    }
}

// ============================================================================
// Id maps
// ============================================================================

/// Cross-reference between a local identifier and its mapped (external) form.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdMap {
    pub id: u64,
    pub local_id: String,
    pub mapped_id: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IdMapFilter {
    pub local_id: Option<String>,
    pub mapped_id: Option<String>,
}

impl IdMapFilter {
    pub fn mapped(mapped_id: &str) -> Self {
        Self {
            local_id: None,
            mapped_id: Some(mapped_id.to_string()),
        }
    }

    pub fn matches(&self, map: &IdMap) -> bool {
        self.local_id.as_ref().is_none_or(|l| *l == map.local_id)
            && self.mapped_id.as_ref().is_none_or(|m| *m == map.mapped_id)
    }
}

// ============================================================================
// Store trait
// ============================================================================

/// Typed persistence operations used by the lifecycle manager.
///
/// Implementations must keep at most one row at [`CURRENT_VERSION`] per [`WorkflowKey`] and must
/// assign strictly increasing event ids.
pub trait WorkflowStore {
    fn select_definitions(&self, filter: &DefinitionFilter) -> StoreResult<Vec<DefinitionRow>>;
    fn insert_definition(&mut self, definition: NewDefinition) -> StoreResult<u64>;
    fn delete_definitions(&mut self, filter: &DefinitionFilter) -> StoreResult<usize>;

    fn select_workflows(&self, filter: &WorkflowFilter) -> StoreResult<Vec<WorkflowRow>>;
    fn insert_workflow(&mut self, workflow: NewWorkflow) -> StoreResult<u64>;
    fn update_workflow(&mut self, update: &WorkflowUpdate) -> StoreResult<()>;
    /// Version-bump every workflow row of `key`. Returns the number of rows superseded.
    fn deprecate_workflows(&mut self, key: &WorkflowKey) -> StoreResult<usize>;

    /// Events matching `filter`, in id order.
    fn select_events(&self, filter: &EventFilter) -> StoreResult<Vec<Event>>;
    fn insert_event(&mut self, event: NewEvent) -> StoreResult<u64>;
    fn deprecate_events(&mut self, key: &WorkflowKey) -> StoreResult<usize>;

    fn select_id_maps(&self, filter: &IdMapFilter) -> StoreResult<Vec<IdMap>>;
    fn insert_id_map(&mut self, local_id: &str, mapped_id: &str) -> StoreResult<u64>;
    fn delete_id_maps(&mut self, filter: &IdMapFilter) -> StoreResult<usize>;
}

pub(crate) fn author_label(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
