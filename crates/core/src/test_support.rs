//! Shared fixtures for unit tests.

use crate::config::CoreConfig;
use crate::constants::{DEFAULT_EVENT_SERVICE_URL, DEFAULT_XDS_DOMAIN_KEY, NHS_OID_DEFAULT};
use crate::lifecycle::{synthesize_document, DocumentSeed, Requester};
use crate::store::{Event, WorkflowKey, WorkflowRow};
use chrono::{DateTime, TimeZone, Utc};
use xdw::{
    AccessType, Definition, Document, InstanceId, Part, PartDefinition, TaskDefinition,
    WorkflowDefinition, WorkflowDocument,
};
use xdw_types::{PatientId, Pathway};

pub const PATIENT: &str = "9434765919";

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
}

pub fn config() -> CoreConfig {
    CoreConfig::new(
        DEFAULT_EVENT_SERVICE_URL.into(),
        DEFAULT_XDS_DOMAIN_KEY.into(),
        NHS_OID_DEFAULT.into(),
        String::new(),
        String::new(),
    )
    .unwrap()
}

pub fn requester() -> Requester {
    Requester::new("alice", "ward9", "nurse")
}

pub fn key(patient: &str) -> WorkflowKey {
    WorkflowKey::new(Pathway::new("toc").unwrap(), PatientId::new(patient).unwrap())
}

/// Mark a part as attached at `at`.
pub fn attach(part: &mut Part, at: DateTime<Utc>) {
    part.attachment.identifier = format!("DOC-{}", part.name);
    part.attachment.attached_time = Some(at);
}

fn part(name: &str, access_type: AccessType) -> PartDefinition {
    PartDefinition {
        name: name.to_string(),
        content_type: "text/plain".to_string(),
        access_type,
    }
}

fn task(id: &str, name: &str) -> TaskDefinition {
    TaskDefinition {
        id: id.to_string(),
        task_type: name.to_string(),
        name: name.to_string(),
        description: format!("{name} task"),
        actual_owner: String::new(),
        expiration_time: None,
        start_by: None,
        complete_by: None,
        is_skippable: false,
        potential_owners: Vec::new(),
        completion_behavior: Vec::new(),
        inputs: Vec::new(),
        outputs: Vec::new(),
    }
}

fn definition(tasks: Vec<TaskDefinition>, completion_behavior: &[&str]) -> WorkflowDefinition {
    WorkflowDefinition {
        reference: "toc".to_string(),
        name: "Transfer of care".to_string(),
        confidentiality_code: "N".to_string(),
        start_by: None,
        complete_by: None,
        completion_behavior: completion_behavior.iter().map(|c| c.to_string()).collect(),
        tasks,
    }
}

/// Two tasks, `1` and `2`, each carrying the given input and output parts.
pub fn document_with_parts(inputs: &[&str], outputs: &[&str]) -> WorkflowDocument {
    let tasks = ["1", "2"]
        .into_iter()
        .map(|id| {
            let mut t = task(id, &format!("step{id}"));
            t.inputs = inputs.iter().map(|n| part(n, AccessType::Registered)).collect();
            t.outputs = outputs
                .iter()
                .map(|n| part(n, AccessType::InlineReference))
                .collect();
            t
        })
        .collect();
    scenario_document(&definition(tasks, &[]))
}

/// `intake` completes on a registered lab result; `review` completes on an inline summary.
pub fn scenario_definition(workflow_conditions: &[&str]) -> WorkflowDefinition {
    let mut intake = task("1", "intake");
    intake.inputs = vec![part("labresult", AccessType::Registered)];
    intake.completion_behavior = vec!["input(labresult)".to_string()];

    let mut review = task("2", "review");
    review.outputs = vec![part("summary", AccessType::InlineReference)];
    review.completion_behavior = vec!["output(summary)".to_string()];

    definition(vec![intake, review], workflow_conditions)
}

/// A freshly created document for `definition`, created at [`t0`].
pub fn scenario_document(definition: &WorkflowDefinition) -> WorkflowDocument {
    synthesize_document(
        definition,
        &DocumentSeed {
            instance_id: InstanceId::new(),
            created: t0(),
            key: key(PATIENT),
            patient_root: NHS_OID_DEFAULT.to_string(),
            author_root: "RR8".to_string(),
            requester: requester(),
            confidentiality_code: definition.confidentiality_code.clone(),
        },
    )
}

pub fn event(id: u64, task_id: &str, expression: &str, uid: &str, at: DateTime<Utc>) -> Event {
    Event {
        id,
        creation_time: at,
        pathway: Pathway::new("toc").unwrap(),
        patient: PatientId::new(PATIENT).unwrap(),
        task_id: task_id.to_string(),
        expression: expression.to_string(),
        xds_doc_entry_uid: uid.to_string(),
        repository_unique_id: String::new(),
        user: "alice".to_string(),
        org: "ward9".to_string(),
        role: "nurse".to_string(),
        comments: String::new(),
        version: 0,
    }
}

/// A current store row holding `document` and `definition` for `patient`.
pub fn workflow_row(
    document: &WorkflowDocument,
    definition: &WorkflowDefinition,
    patient: &str,
) -> WorkflowRow {
    WorkflowRow {
        id: 1,
        created: document.effective_time,
        pathway: Pathway::new("toc").unwrap(),
        patient: PatientId::new(patient).unwrap(),
        instance_id: document.id.extension.clone(),
        version: 0,
        document: Document::render(document).unwrap(),
        definition: Definition::render(definition).unwrap(),
        published: false,
        status: document.workflow_status,
    }
}
