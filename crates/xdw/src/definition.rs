//! Workflow definition wire models and translation helpers.
//!
//! A definition is the declarative template of a pathway: its tasks, the typed input/output
//! parts each task expects, and the completion behaviour (condition expressions) for each task
//! and for the workflow as a whole.
//!
//! Responsibilities:
//! - Define public domain-level types consumed by the engine
//! - Define the registration wire model (the JSON payload administrators submit)
//! - Validate task identity (non-empty, unique) at the boundary
//!
//! Notes:
//! - Definitions are immutable once registered; changes are delete+reinsert
//! - Condition text is carried verbatim; it is parsed by the evaluator in `xdw-core`

use crate::{schema_mismatch, XdwError, XdwResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Access type value used by the registration vocabulary for XDS registered artefacts.
pub const XDS_REGISTERED_ACCESS_TYPE: &str = "urn:ihe:iti:xdw:2011:XDSregistered";

/// Access type value written for inline references.
pub const INLINE_REFERENCE_ACCESS_TYPE: &str = "urn:ihe:iti:xdw:2011:inlineReference";

// ============================================================================
// Public domain-level types
// ============================================================================

/// Domain-level carrier for a registered workflow definition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkflowDefinition {
    /// Pathway reference, e.g. `toc`.
    pub reference: String,

    /// Human readable pathway name.
    pub name: String,

    /// Confidentiality code stamped on every document created from this definition.
    pub confidentiality_code: String,

    /// Period expression for when the pathway should have started.
    pub start_by: Option<String>,

    /// Period expression (`<unit>(<n>)`) for when the pathway should be complete.
    pub complete_by: Option<String>,

    /// Workflow-level completion conditions.
    pub completion_behavior: Vec<String>,

    /// Ordered task templates.
    pub tasks: Vec<TaskDefinition>,
}

/// A single task template.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskDefinition {
    pub id: String,
    pub task_type: String,
    pub name: String,
    pub description: String,
    pub actual_owner: String,
    pub expiration_time: Option<String>,
    pub start_by: Option<String>,
    pub complete_by: Option<String>,
    pub is_skippable: bool,
    pub potential_owners: Vec<String>,
    pub completion_behavior: Vec<String>,
    pub inputs: Vec<PartDefinition>,
    pub outputs: Vec<PartDefinition>,
}

/// A typed input or output slot on a task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartDefinition {
    pub name: String,
    pub content_type: String,
    pub access_type: AccessType,
}

/// How the artefact attached to a part is referenced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessType {
    /// The artefact is registered in the external document registry.
    Registered,
    /// The artefact is referenced through the event service.
    InlineReference,
}

impl AccessType {
    /// Interpret a registration access type value.
    ///
    /// Any value ending in `XDSregistered` (the IHE URN or a bare suffix) or equal to `registered`
    /// is [`AccessType::Registered`]; everything else is an inline reference.
    pub fn from_wire(value: &str) -> Self {
        let value = value.trim();
        if value.ends_with("XDSregistered") || value.eq_ignore_ascii_case("registered") {
            AccessType::Registered
        } else {
            AccessType::InlineReference
        }
    }

    pub fn as_wire(self) -> &'static str {
        match self {
            AccessType::Registered => XDS_REGISTERED_ACCESS_TYPE,
            AccessType::InlineReference => INLINE_REFERENCE_ACCESS_TYPE,
        }
    }
}

impl WorkflowDefinition {
    /// Look up a task template by its stable string id.
    pub fn task(&self, id: &str) -> Option<&TaskDefinition> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Part names whose artefacts are registered externally, in declaration order, deduplicated.
    ///
    /// These are the expressions the broker is asked to notify on.
    pub fn registered_expressions(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.tasks
            .iter()
            .flat_map(|t| t.inputs.iter().chain(t.outputs.iter()))
            .filter(|p| p.access_type == AccessType::Registered)
            .filter(|p| seen.insert(p.name.clone()))
            .map(|p| p.name.clone())
            .collect()
    }

    /// Every condition expression in the definition, labelled with where it was declared.
    pub fn conditions(&self) -> Vec<(String, &str)> {
        let workflow = self
            .completion_behavior
            .iter()
            .map(|c| ("workflow".to_string(), c.as_str()));
        let tasks = self.tasks.iter().flat_map(|t| {
            t.completion_behavior
                .iter()
                .map(move |c| (format!("task {}", t.id), c.as_str()))
        });
        workflow.chain(tasks).collect()
    }
}

// ============================================================================
// Public Definition operations
// ============================================================================

/// Workflow definition operations.
///
/// This is a zero-sized type used for namespacing definition-related operations.
pub struct Definition;

impl Definition {
    /// Parse a workflow definition from its JSON registration payload.
    ///
    /// # Arguments
    ///
    /// * `json_text` - JSON text of the definition.
    ///
    /// # Returns
    ///
    /// Returns a [`WorkflowDefinition`] with blank period expressions normalised to `None`.
    ///
    /// # Errors
    ///
    /// Returns [`XdwError`] if:
    /// - the payload is empty or not valid JSON for the definition schema,
    /// - `ref` is empty,
    /// - a task id is empty or repeated.
    pub fn parse(json_text: &str) -> XdwResult<WorkflowDefinition> {
        if json_text.trim().is_empty() {
            return Err(XdwError::InvalidInput(
                "definition payload cannot be empty".into(),
            ));
        }

        let mut deserializer = serde_json::Deserializer::from_str(json_text);
        let wire: DefinitionWire = serde_path_to_error::deserialize(&mut deserializer)
            .map_err(|e| schema_mismatch("Workflow definition", e))?;

        wire_to_domain(wire)
    }

    /// Render a definition as the JSON snapshot stored alongside each workflow row.
    ///
    /// # Errors
    ///
    /// Returns [`XdwError`] if serialization fails.
    pub fn render(definition: &WorkflowDefinition) -> XdwResult<String> {
        let wire = domain_to_wire(definition);
        serde_json::to_string(&wire).map_err(|e| {
            XdwError::Translation(format!("Failed to serialize workflow definition: {e}"))
        })
    }
}

// ============================================================================
// Wire types (internal)
// ============================================================================

#[derive(Clone, Debug, Deserialize, Serialize, Default)]
struct DefinitionWire {
    #[serde(rename = "ref")]
    reference: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    confidentialitycode: String,
    #[serde(default)]
    startbytime: String,
    #[serde(default)]
    completebytime: String,
    #[serde(default, rename = "completionBehavior")]
    completion_behavior: Vec<CompletionBehaviorWire>,
    #[serde(default)]
    tasks: Vec<TaskWire>,
}

#[derive(Clone, Debug, Deserialize, Serialize, Default)]
struct CompletionBehaviorWire {
    completion: CompletionWire,
}

#[derive(Clone, Debug, Deserialize, Serialize, Default)]
struct CompletionWire {
    condition: String,
}

#[derive(Clone, Debug, Deserialize, Serialize, Default)]
struct TaskWire {
    id: String,
    #[serde(default)]
    tasktype: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    actualowner: String,
    #[serde(default)]
    expirationtime: String,
    #[serde(default)]
    startbytime: String,
    #[serde(default)]
    completebytime: String,
    #[serde(default)]
    isskipable: bool,
    #[serde(default, rename = "potentialOwners")]
    potential_owners: Vec<PotentialOwnerWire>,
    #[serde(default, rename = "completionBehavior")]
    completion_behavior: Vec<CompletionBehaviorWire>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    input: Vec<PartWire>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    output: Vec<PartWire>,
}

#[derive(Clone, Debug, Deserialize, Serialize, Default)]
struct PotentialOwnerWire {
    #[serde(rename = "organizationalEntity")]
    organizational_entity: OrganizationalEntityWire,
}

#[derive(Clone, Debug, Deserialize, Serialize, Default)]
struct OrganizationalEntityWire {
    #[serde(default)]
    user: String,
}

#[derive(Clone, Debug, Deserialize, Serialize, Default)]
struct PartWire {
    name: String,
    #[serde(default)]
    contenttype: String,
    #[serde(default)]
    accesstype: String,
}

// ============================================================================
// Helper functions (internal)
// ============================================================================

fn non_blank(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn conditions_from_wire(behaviour: Vec<CompletionBehaviorWire>) -> Vec<String> {
    behaviour
        .into_iter()
        .filter_map(|b| non_blank(b.completion.condition))
        .collect()
}

fn conditions_to_wire(conditions: &[String]) -> Vec<CompletionBehaviorWire> {
    conditions
        .iter()
        .map(|c| CompletionBehaviorWire {
            completion: CompletionWire {
                condition: c.clone(),
            },
        })
        .collect()
}

fn part_from_wire(part: PartWire) -> XdwResult<PartDefinition> {
    let name = part.name.trim().to_string();
    if name.is_empty() {
        return Err(XdwError::InvalidInput("part name cannot be empty".into()));
    }
    Ok(PartDefinition {
        name,
        content_type: part.contenttype,
        access_type: AccessType::from_wire(&part.accesstype),
    })
}

fn part_to_wire(part: &PartDefinition) -> PartWire {
    PartWire {
        name: part.name.clone(),
        contenttype: part.content_type.clone(),
        accesstype: part.access_type.as_wire().to_string(),
    }
}

fn wire_to_domain(wire: DefinitionWire) -> XdwResult<WorkflowDefinition> {
    let reference = wire.reference.trim().to_string();
    if reference.is_empty() {
        return Err(XdwError::InvalidInput(
            "definition ref cannot be empty".into(),
        ));
    }

    let mut seen = HashSet::new();
    let mut tasks = Vec::with_capacity(wire.tasks.len());
    for task in wire.tasks {
        let id = task.id.trim().to_string();
        if id.is_empty() {
            return Err(XdwError::InvalidInput(format!(
                "task id cannot be empty in definition {reference}"
            )));
        }
        if !seen.insert(id.clone()) {
            return Err(XdwError::InvalidInput(format!(
                "duplicate task id {id} in definition {reference}"
            )));
        }

        tasks.push(TaskDefinition {
            id,
            task_type: task.tasktype,
            name: task.name,
            description: task.description,
            actual_owner: task.actualowner,
            expiration_time: non_blank(task.expirationtime),
            start_by: non_blank(task.startbytime),
            complete_by: non_blank(task.completebytime),
            is_skippable: task.isskipable,
            potential_owners: task
                .potential_owners
                .into_iter()
                .map(|o| o.organizational_entity.user)
                .filter(|u| !u.trim().is_empty())
                .collect(),
            completion_behavior: conditions_from_wire(task.completion_behavior),
            inputs: task
                .input
                .into_iter()
                .map(part_from_wire)
                .collect::<XdwResult<_>>()?,
            outputs: task
                .output
                .into_iter()
                .map(part_from_wire)
                .collect::<XdwResult<_>>()?,
        });
    }

    Ok(WorkflowDefinition {
        reference,
        name: wire.name,
        confidentiality_code: wire.confidentialitycode,
        start_by: non_blank(wire.startbytime),
        complete_by: non_blank(wire.completebytime),
        completion_behavior: conditions_from_wire(wire.completion_behavior),
        tasks,
    })
}

fn domain_to_wire(definition: &WorkflowDefinition) -> DefinitionWire {
    DefinitionWire {
        reference: definition.reference.clone(),
        name: definition.name.clone(),
        confidentialitycode: definition.confidentiality_code.clone(),
        startbytime: definition.start_by.clone().unwrap_or_default(),
        completebytime: definition.complete_by.clone().unwrap_or_default(),
        completion_behavior: conditions_to_wire(&definition.completion_behavior),
        tasks: definition
            .tasks
            .iter()
            .map(|t| TaskWire {
                id: t.id.clone(),
                tasktype: t.task_type.clone(),
                name: t.name.clone(),
                description: t.description.clone(),
                actualowner: t.actual_owner.clone(),
                expirationtime: t.expiration_time.clone().unwrap_or_default(),
                startbytime: t.start_by.clone().unwrap_or_default(),
                completebytime: t.complete_by.clone().unwrap_or_default(),
                isskipable: t.is_skippable,
                potential_owners: t
                    .potential_owners
                    .iter()
                    .map(|u| PotentialOwnerWire {
                        organizational_entity: OrganizationalEntityWire { user: u.clone() },
                    })
                    .collect(),
                completion_behavior: conditions_to_wire(&t.completion_behavior),
                input: t.inputs.iter().map(part_to_wire).collect(),
                output: t.outputs.iter().map(part_to_wire).collect(),
            })
            .collect(),
    }
}
