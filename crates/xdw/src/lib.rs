//! XDW wire/boundary support for the workflow document engine.
//!
//! This crate provides **wire models** and **format/translation helpers** for the artefacts the
//! engine exchanges with its collaborators:
//! - workflow definitions, registered by administrators as JSON
//! - XDS metadata companions, registered alongside a definition as JSON
//! - workflow documents, persisted as YAML in the store
//!
//! This crate focuses on:
//! - IHE XDW semantic alignment (without the XML wire schema)
//! - serialisation/deserialisation with field-path error reporting
//! - document navigation helpers shared by the evaluator and reconciler
//!
//! It contains no state transitions; those live in `xdw-core`.

pub mod definition;
pub mod document;
pub mod ids;
pub mod meta;

// Re-export facades
pub use definition::Definition;
pub use document::Document;
pub use meta::XdsMeta;

// Re-export public domain-level types
pub use definition::{AccessType, PartDefinition, TaskDefinition, WorkflowDefinition};
pub use document::{
    AttachmentInfo, DocumentAuthor, DocumentEvent, Identifier, Part, TaskDetails, TaskEvent,
    TaskEventStatus, TaskStatus, WorkflowDocument, WorkflowStatus, XdwTask,
};
pub use ids::InstanceId;
pub use meta::XdsDocumentMeta;

/// Errors returned by the `xdw` boundary crate.
#[derive(Debug, thiserror::Error)]
pub enum XdwError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid YAML: {0}")]
    InvalidYaml(#[from] serde_yaml::Error),

    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("translation error: {0}")]
    Translation(String),

    #[error("invalid instance id: {0}")]
    InvalidInstanceId(String),
}

/// Type alias for Results that can fail with an [`XdwError`].
pub type XdwResult<T> = Result<T, XdwError>;

/// Format a `serde_path_to_error` failure as a translation error naming the failing field.
pub(crate) fn schema_mismatch<E: std::fmt::Display>(
    what: &str,
    err: serde_path_to_error::Error<E>,
) -> XdwError {
    let path = err.path().to_string();
    let source = err.into_inner();
    let path = if path.is_empty() || path == "." {
        "<root>".to_string()
    } else {
        path
    };
    XdwError::Translation(format!("{what} schema mismatch at {path}: {source}"))
}
