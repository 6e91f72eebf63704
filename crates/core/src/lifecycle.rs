//! Workflow lifecycle operations.
//!
//! The [`LifecycleManager`] is the entry point for every use case: registering definitions and
//! their XDS metadata, creating an instance for a patient, reconciling pending events into it,
//! and computing its read state.
//!
//! Each operation is a sequence of blocking store calls with no transaction spanning them. A
//! failure part-way leaves the instance at its last persisted state; events not yet applied are
//! picked up by the next update because every event application is individually idempotent.

use crate::clock::{Clock, SystemClock};
use crate::condition::{Clause, Condition, Method};
use crate::config::CoreConfig;
use crate::constants::{CREATED_EVENT_TYPE, DSUB_TOPIC_TYPE_CODE, PATIENT_ASSIGNING_AUTHORITY};
use crate::dashboard::Dashboard;
use crate::reconcile::{ReconcileOutcome, Reconciler};
use crate::store::{
    author_label, DefinitionFilter, EventFilter, IdMapFilter, NewDefinition, NewEvent,
    NewWorkflow, WorkflowFilter, WorkflowKey, WorkflowRow, WorkflowStore, WorkflowUpdate,
};
use crate::subscription::{Subscription, SubscriptionFilter, SubscriptionRequest, SubscriptionService};
use crate::timing::{task_states, workflow_state, TaskState, WorkflowState};
use crate::{CoreError, CoreResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use xdw::{
    AttachmentInfo, Definition, Document, DocumentAuthor, DocumentEvent, Identifier, InstanceId,
    Part, PartDefinition, TaskDetails, TaskEvent, TaskEventStatus, TaskStatus, WorkflowDefinition,
    WorkflowDocument, WorkflowStatus, XdsMeta, XdwTask,
};
use xdw_types::Pathway;

// ============================================================================
// Requests and responses
// ============================================================================

/// The clinician or system acting on a workflow.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requester {
    pub user: String,
    pub org: String,
    pub role: String,
}

impl Requester {
    pub fn new(user: impl Into<String>, org: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            org: org.into(),
            role: role.into(),
        }
    }

    /// `user org role`, skipping blanks.
    pub fn label(&self) -> String {
        author_label(&[&self.user, &self.org, &self.role])
    }
}

/// A lifecycle request, resolved once at the system boundary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum XdwRequest {
    RegisterDefinition { pathway: Pathway, payload: String },
    RegisterXdsMeta { pathway: Pathway, payload: String },
    Create { key: WorkflowKey, requester: Requester },
    Update { key: WorkflowKey, requester: Requester },
    Consume { key: WorkflowKey, requester: Requester },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum XdwResponse {
    Registered(RegistrationReport),
    XdsMetaRegistered,
    Created(Box<WorkflowDocument>),
    Updated(Box<UpdateReport>),
    Consumed(Box<ConsumeReport>),
}

/// Result of registering a definition.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RegistrationReport {
    pub pathway: String,
    pub tasks: usize,
    pub cancelled_subscriptions: usize,
    pub subscriptions: Vec<Subscription>,
    /// Clauses that can never be satisfied, with where they were declared.
    pub malformed_clauses: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UpdateReport {
    pub document: WorkflowDocument,
    #[serde(skip)]
    pub definition: WorkflowDefinition,
    pub published: bool,
    pub outcome: ReconcileOutcome,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ConsumeReport {
    pub document: WorkflowDocument,
    pub state: WorkflowState,
    pub tasks: Vec<TaskState>,
    pub dashboard: Dashboard,
}

// ============================================================================
// LifecycleManager
// ============================================================================

/// Orchestrates workflow use cases over an injected store and subscription service.
pub struct LifecycleManager<S, B> {
    config: Arc<CoreConfig>,
    store: S,
    subscriptions: B,
    clock: Arc<dyn Clock>,
}

impl<S: WorkflowStore, B: SubscriptionService> LifecycleManager<S, B> {
    /// Creates a new `LifecycleManager` using the system clock.
    ///
    /// # Arguments
    ///
    /// * `config` - Core configuration resolved at startup.
    /// * `store` - Persistence for definitions, workflows, events and id maps.
    /// * `subscriptions` - Notification broker seam.
    pub fn new(config: Arc<CoreConfig>, store: S, subscriptions: B) -> Self {
        Self {
            config,
            store,
            subscriptions,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the clock, typically with a [`FixedClock`](crate::clock::FixedClock) in tests.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn subscriptions(&self) -> &B {
        &self.subscriptions
    }

    pub fn into_parts(self) -> (S, B) {
        (self.store, self.subscriptions)
    }

    /// Dispatch a request to the matching operation.
    pub fn execute(&mut self, request: XdwRequest) -> CoreResult<XdwResponse> {
        match request {
            XdwRequest::RegisterDefinition { pathway, payload } => self
                .register_definition(&pathway, &payload)
                .map(XdwResponse::Registered),
            XdwRequest::RegisterXdsMeta { pathway, payload } => self
                .register_xds_meta(&pathway, &payload)
                .map(|()| XdwResponse::XdsMetaRegistered),
            XdwRequest::Create { key, requester } => self
                .create(&key, &requester)
                .map(|doc| XdwResponse::Created(Box::new(doc))),
            XdwRequest::Update { key, requester } => self
                .update(&key, &requester)
                .map(|report| XdwResponse::Updated(Box::new(report))),
            XdwRequest::Consume { key, requester } => self
                .consume(&key, &requester)
                .map(|report| XdwResponse::Consumed(Box::new(report))),
        }
    }

    // ------------------------------------------------------------------------
    // Admin register
    // ------------------------------------------------------------------------

    /// Register (or replace) the definition of a pathway.
    ///
    /// Prior broker subscriptions for the pathway are cancelled, the definition is stored with
    /// delete-then-insert, and a subscription is created for every registered part expression.
    /// Malformed completion clauses are logged and reported but do not block registration; they
    /// evaluate as unsatisfied.
    ///
    /// # Errors
    ///
    /// Returns a configuration-class [`CoreError`] for an empty or invalid payload before anything
    /// is written, or a store/subscription error if a collaborator fails.
    pub fn register_definition(
        &mut self,
        pathway: &Pathway,
        payload: &str,
    ) -> CoreResult<RegistrationReport> {
        let definition = Definition::parse(payload)?;
        if !definition.reference.eq_ignore_ascii_case(pathway.as_str()) {
            tracing::warn!(
                "definition ref {} registered under pathway {}",
                definition.reference,
                pathway
            );
        }

        let malformed_clauses = malformed_clauses(&definition);
        for clause in &malformed_clauses {
            tracing::warn!(pathway = %pathway, "completion clause can never be satisfied: {clause}");
        }

        let cancelled_subscriptions = self.subscriptions.cancel(pathway)?;
        self.store
            .delete_definitions(&DefinitionFilter::definition(pathway))?;
        self.store.insert_definition(NewDefinition {
            name: pathway.as_str().to_string(),
            is_xds_meta: false,
            payload: payload.to_string(),
        })?;

        let subscriptions = self.subscribe(pathway, &definition.registered_expressions())?;

        tracing::info!(
            pathway = %pathway,
            tasks = definition.tasks.len(),
            cancelled = cancelled_subscriptions,
            subscribed = subscriptions.len(),
            "registered workflow definition"
        );

        Ok(RegistrationReport {
            pathway: pathway.to_string(),
            tasks: definition.tasks.len(),
            cancelled_subscriptions,
            subscriptions,
            malformed_clauses,
        })
    }

    fn subscribe(
        &mut self,
        pathway: &Pathway,
        expressions: &[String],
    ) -> CoreResult<Vec<Subscription>> {
        let mut created = Vec::new();
        for expression in expressions {
            let existing = self.subscriptions.select(&SubscriptionFilter {
                pathway: Some(pathway.clone()),
                topic: Some(DSUB_TOPIC_TYPE_CODE.to_string()),
                expression: Some(expression.clone()),
            })?;
            if !existing.is_empty() {
                tracing::debug!(pathway = %pathway, "already subscribed to {expression}");
                continue;
            }

            let broker_ref = self.subscriptions.create(&SubscriptionRequest {
                pathway: pathway.clone(),
                expression: expression.clone(),
                topic: DSUB_TOPIC_TYPE_CODE.to_string(),
                broker_url: self.config.dsub_broker_url().to_string(),
                consumer_url: self.config.dsub_consumer_url().to_string(),
            })?;
            if broker_ref.is_empty() {
                tracing::warn!(pathway = %pathway, "broker returned no reference for {expression}");
                continue;
            }
            created.push(Subscription {
                broker_ref,
                pathway: pathway.clone(),
                topic: DSUB_TOPIC_TYPE_CODE.to_string(),
                expression: expression.clone(),
            });
        }
        Ok(created)
    }

    /// Register (or replace) the XDS metadata companion of a pathway.
    ///
    /// # Errors
    ///
    /// Returns a configuration-class [`CoreError`] for an empty or invalid payload, or a store
    /// error.
    pub fn register_xds_meta(&mut self, pathway: &Pathway, payload: &str) -> CoreResult<()> {
        XdsMeta::parse(payload)?;
        self.store
            .delete_definitions(&DefinitionFilter::xds_meta(pathway))?;
        self.store.insert_definition(NewDefinition {
            name: pathway.meta_name(),
            is_xds_meta: true,
            payload: payload.to_string(),
        })?;
        tracing::info!(pathway = %pathway, "registered XDS metadata");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------------

    /// Enrol a patient in a pathway.
    ///
    /// Any existing instance and events for the key are deprecated first; the new instance
    /// becomes the current row.
    ///
    /// # Returns
    ///
    /// The new document, with every task CREATED and no attachments.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::MissingDefinition`] or [`CoreError::MissingMetadata`] before any write
    /// if the pathway is not fully registered.
    pub fn create(&mut self, key: &WorkflowKey, requester: &Requester) -> CoreResult<WorkflowDocument> {
        let (definition_payload, definition) = self.load_definition(&key.pathway)?;
        let meta = self.load_xds_meta(&key.pathway)?;

        let superseded = self.store.deprecate_workflows(key)?;
        let superseded_events = self.store.deprecate_events(key)?;
        if superseded > 0 {
            tracing::info!(
                workflow = %key,
                rows = superseded,
                events = superseded_events,
                "deprecated previous workflow"
            );
        }

        let confidentiality_code = if definition.confidentiality_code.trim().is_empty() {
            meta.confcode
        } else {
            definition.confidentiality_code.clone()
        };
        let seed = DocumentSeed {
            instance_id: InstanceId::new(),
            created: self.clock.now(),
            key: key.clone(),
            patient_root: self.config.patient_id_root().to_string(),
            author_root: self.author_root(&requester.org)?,
            requester: requester.clone(),
            confidentiality_code,
        };
        let document = synthesize_document(&definition, &seed);

        self.store.insert_workflow(NewWorkflow {
            created: seed.created,
            key: key.clone(),
            instance_id: seed.instance_id.to_string(),
            document: Document::render(&document)?,
            definition: definition_payload,
            status: document.workflow_status,
        })?;

        tracing::info!(
            workflow = %key,
            instance = %seed.instance_id,
            "{} created new {} workflow",
            requester.user,
            document.definition_reference
        );
        Ok(document)
    }

    // ------------------------------------------------------------------------
    // Update / Consume
    // ------------------------------------------------------------------------

    /// Reconcile pending events into the current instance and persist the result.
    ///
    /// Nothing is written when no event applies and no status changes.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::WorkflowNotFound`] if the key has no current instance, or a store or
    /// data error if the stored instance cannot be read or written.
    pub fn update(&mut self, key: &WorkflowKey, requester: &Requester) -> CoreResult<UpdateReport> {
        let row = self.current_row(key)?;
        let mut document = Document::parse(&row.document)?;
        let definition = Definition::parse(&row.definition)?;

        let pending: Vec<_> = self
            .store
            .select_events(&EventFilter::current(key))?
            .into_iter()
            .filter(|e| !document.has_recorded(e.id))
            .collect();

        let home_community_id = self.local_id(self.config.xds_domain_key())?;
        let reconciler = Reconciler::new(&self.config, home_community_id);
        let outcome = reconciler.apply(
            &mut document,
            &definition,
            &pending,
            &requester.label(),
            self.clock.now(),
        );

        let mut published = row.published;
        if outcome.changed() {
            published = false;
            self.store.update_workflow(&WorkflowUpdate {
                key: key.clone(),
                version: row.version,
                document: Document::render(&document)?,
                published,
                status: document.workflow_status,
            })?;
            tracing::info!(
                workflow = %key,
                applied = outcome.applied.len(),
                sequence = document.sequence_number,
                status = %document.workflow_status,
                "updated workflow"
            );
        }

        Ok(UpdateReport {
            document,
            definition,
            published,
            outcome,
        })
    }

    /// Reconcile, then compute the read state of the instance.
    ///
    /// The dashboard covers every current instance of the same pathway.
    pub fn consume(&mut self, key: &WorkflowKey, requester: &Requester) -> CoreResult<ConsumeReport> {
        let report = self.update(key, requester)?;
        let now = self.clock.now();

        let notes = self.notes_by_task(key)?;
        let state = workflow_state(&report.document, &report.definition, report.published, now);
        let tasks = task_states(&report.document, &report.definition, &notes, now);
        let dashboard = self.dashboard(Some(&key.pathway))?;

        Ok(ConsumeReport {
            document: report.document,
            state,
            tasks,
            dashboard,
        })
    }

    // ------------------------------------------------------------------------
    // Queries and housekeeping
    // ------------------------------------------------------------------------

    /// Append an event to the store and return its id.
    pub fn record_event(&mut self, event: NewEvent) -> CoreResult<u64> {
        if event.task_id.trim().is_empty() || event.expression.trim().is_empty() {
            return Err(CoreError::InvalidInput(
                "event requires a task id and an expression".into(),
            ));
        }
        let id = self.store.insert_event(event)?;
        tracing::debug!(event = id, "recorded event");
        Ok(id)
    }

    /// Comments recorded against a task of the current instance, oldest first.
    pub fn task_notes(&self, key: &WorkflowKey, task_id: &str) -> CoreResult<Vec<String>> {
        let filter = EventFilter {
            task_id: Some(task_id.to_string()),
            ..EventFilter::current(key)
        };
        Ok(self
            .store
            .select_events(&filter)?
            .into_iter()
            .map(|e| e.comments)
            .filter(|c| !c.trim().is_empty())
            .collect())
    }

    fn notes_by_task(&self, key: &WorkflowKey) -> CoreResult<HashMap<String, Vec<String>>> {
        let mut notes: HashMap<String, Vec<String>> = HashMap::new();
        for event in self.store.select_events(&EventFilter::current(key))? {
            if !event.comments.trim().is_empty() {
                notes.entry(event.task_id).or_default().push(event.comments);
            }
        }
        Ok(notes)
    }

    /// Record that the current document has been published.
    pub fn mark_published(&mut self, key: &WorkflowKey) -> CoreResult<()> {
        let row = self.current_row(key)?;
        self.store.update_workflow(&WorkflowUpdate {
            key: key.clone(),
            version: row.version,
            document: row.document,
            published: true,
            status: row.status,
        })?;
        Ok(())
    }

    /// Counts over the current instances of one pathway, or of all pathways.
    pub fn dashboard(&self, pathway: Option<&Pathway>) -> CoreResult<Dashboard> {
        let rows = self
            .store
            .select_workflows(&WorkflowFilter::current_for(pathway))?;
        Ok(Dashboard::from_rows(&rows, self.clock.now()))
    }

    /// Pathways with at least one current instance that is not closed.
    pub fn active_pathways(&self) -> CoreResult<Vec<Pathway>> {
        let rows = self
            .store
            .select_workflows(&WorkflowFilter::current_for(None))?;
        let active: BTreeSet<Pathway> = rows
            .into_iter()
            .filter(|r| r.status.is_active())
            .map(|r| r.pathway)
            .collect();
        Ok(active.into_iter().collect())
    }

    /// Names of registered definitions, or of XDS metadata companions.
    pub fn definition_names(&self, xds_meta: bool) -> CoreResult<Vec<String>> {
        let mut names: Vec<String> = self
            .store
            .select_definitions(&DefinitionFilter {
                name: None,
                is_xds_meta: Some(xds_meta),
            })?
            .into_iter()
            .map(|d| d.name)
            .collect();
        names.sort();
        Ok(names)
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    fn load_definition(&self, pathway: &Pathway) -> CoreResult<(String, WorkflowDefinition)> {
        let row = self
            .store
            .select_definitions(&DefinitionFilter::definition(pathway))?
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::MissingDefinition(pathway.to_string()))?;
        let definition = Definition::parse(&row.payload)?;
        Ok((row.payload, definition))
    }

    fn load_xds_meta(&self, pathway: &Pathway) -> CoreResult<xdw::XdsDocumentMeta> {
        let row = self
            .store
            .select_definitions(&DefinitionFilter::xds_meta(pathway))?
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::MissingMetadata(pathway.to_string()))?;
        Ok(XdsMeta::parse(&row.payload)?)
    }

    fn current_row(&self, key: &WorkflowKey) -> CoreResult<WorkflowRow> {
        let mut rows = self.store.select_workflows(&WorkflowFilter::current(key))?;
        match rows.len() {
            0 => Err(CoreError::WorkflowNotFound {
                pathway: key.pathway.to_string(),
                patient: key.patient.to_string(),
            }),
            1 => Ok(rows.remove(0)),
            count => Err(CoreError::AmbiguousWorkflow {
                pathway: key.pathway.to_string(),
                patient: key.patient.to_string(),
                count,
            }),
        }
    }

    /// Author id root: the local id mapped from the organisation, else the organisation itself.
    fn author_root(&self, org: &str) -> CoreResult<String> {
        let local = self.local_id(org)?;
        Ok(if local.is_empty() {
            org.to_uppercase()
        } else {
            local
        })
    }

    /// Local id cross-referenced to `mapped_id`, or empty if there is none.
    fn local_id(&self, mapped_id: &str) -> CoreResult<String> {
        Ok(self
            .store
            .select_id_maps(&IdMapFilter::mapped(mapped_id))?
            .into_iter()
            .next()
            .map(|m| m.local_id)
            .unwrap_or_default())
    }
}

/// Clauses that can never be satisfied, labelled with where they were declared.
fn malformed_clauses(definition: &WorkflowDefinition) -> Vec<String> {
    let mut found = Vec::new();
    for (origin, text) in definition.conditions() {
        let workflow_level = origin == "workflow";
        for clause in Condition::parse(text).clauses() {
            let problem = match clause {
                Clause::Malformed { error, .. } => Some(error.to_string()),
                Clause::Valid {
                    method: Method::Unknown(name),
                    ..
                } => Some(format!("unknown condition method {name}")),
                Clause::Valid { method, .. } if workflow_level && *method != Method::Task => {
                    Some("workflow completion only supports task()".to_string())
                }
                Clause::Valid {
                    method: Method::Task,
                    param,
                } if definition.task(param).is_none() => Some(format!("unknown task {param}")),
                Clause::Valid { .. } => None,
            };
            if let Some(problem) = problem {
                found.push(format!("{origin}: {clause}: {problem}"));
            }
        }
    }
    found
}

// ============================================================================
// Document synthesis
// ============================================================================

/// Everything a new document needs beyond its definition.
#[derive(Clone, Debug)]
pub(crate) struct DocumentSeed {
    pub instance_id: InstanceId,
    pub created: DateTime<Utc>,
    pub key: WorkflowKey,
    pub patient_root: String,
    pub author_root: String,
    pub requester: Requester,
    pub confidentiality_code: String,
}

fn new_part(part: &PartDefinition) -> Part {
    Part {
        name: part.name.clone(),
        attachment: AttachmentInfo {
            identifier: String::new(),
            access_type: part.access_type,
            content_type: part.content_type.clone(),
            attached_time: None,
            attached_by: String::new(),
            home_community_id: String::new(),
        },
    }
}

/// Build a fresh document: one CREATED task per definition task, nothing attached.
pub(crate) fn synthesize_document(
    definition: &WorkflowDefinition,
    seed: &DocumentSeed,
) -> WorkflowDocument {
    let org = seed.requester.org.to_uppercase();
    let created_by = author_label(&[&seed.requester.role, &seed.requester.user]);

    let tasks = definition
        .tasks
        .iter()
        .map(|t| XdwTask {
            details: TaskDetails {
                id: t.id.clone(),
                task_type: t.task_type.clone(),
                name: t.name.clone(),
                status: TaskStatus::Created,
                actual_owner: t.actual_owner.clone(),
                created_time: seed.created,
                created_by: created_by.clone(),
                activation_time: None,
                last_modified_time: seed.created,
            },
            description: t.description.clone(),
            inputs: t.inputs.iter().map(new_part).collect(),
            outputs: t.outputs.iter().map(new_part).collect(),
            event_history: vec![TaskEvent {
                id: None,
                event_time: seed.created,
                identifier: t.id.clone(),
                event_type: CREATED_EVENT_TYPE.to_string(),
                status: TaskEventStatus::Created,
            }],
        })
        .collect();

    WorkflowDocument {
        id: Identifier {
            root: InstanceId::root(),
            extension: seed.instance_id.to_string(),
            assigning_authority_name: org.clone(),
        },
        effective_time: seed.created,
        confidentiality_code: seed.confidentiality_code.clone(),
        patient: Identifier {
            root: seed.patient_root.clone(),
            extension: seed.key.patient.to_string(),
            assigning_authority_name: PATIENT_ASSIGNING_AUTHORITY.to_string(),
        },
        author: DocumentAuthor {
            id: Identifier {
                root: seed.author_root.clone(),
                extension: org,
                assigning_authority_name: seed.author_root.clone(),
            },
            family: seed.requester.user.clone(),
            prefix: seed.requester.role.clone(),
        },
        workflow_instance_id: seed.instance_id.workflow_instance_id(),
        sequence_number: 1,
        workflow_status: WorkflowStatus::Open,
        status_history: vec![DocumentEvent {
            event_time: seed.created,
            event_type: CREATED_EVENT_TYPE.to_string(),
            task_event_identifier: definition
                .tasks
                .first()
                .map(|t| t.id.clone())
                .unwrap_or_default(),
            author: author_label(&[&seed.requester.user, &seed.requester.role]),
            previous_status: None,
            actual_status: WorkflowStatus::Open,
        }],
        definition_reference: seed.key.pathway.reference(),
        tasks,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::store::InMemoryStore;
    use crate::subscription::InMemorySubscriptions;
    use crate::test_support::{config, key, requester, t0, PATIENT};
    use crate::ErrorKind;
    use chrono::Duration;
    use xdw_types::PatientId;

    const TOC: &str = r#"{
        "ref": "toc",
        "name": "Transfer of Care",
        "confidentialitycode": "",
        "completebytime": "day(2)",
        "completionBehavior": [{"completion": {"condition": "task(1) and task(2)"}}],
        "tasks": [
            {
                "id": "1",
                "tasktype": "intake",
                "name": "Intake",
                "completionBehavior": [{"completion": {"condition": "input(labresult)"}}],
                "input": [{"name": "labresult", "contenttype": "application/pdf",
                           "accesstype": "urn:ihe:iti:xdw:2011:XDSregistered"}]
            },
            {
                "id": "2",
                "tasktype": "review",
                "name": "Review",
                "completionBehavior": [{"completion": {"condition": "output(summary)"}}],
                "output": [{"name": "summary", "contenttype": "text/plain", "accesstype": "inline"}]
            }
        ]
    }"#;

    const META: &str = r#"{"repositoryuniqueid": "1.2.3", "confcode": "R", "mimetype": "text/xml"}"#;

    type Manager = LifecycleManager<InMemoryStore, InMemorySubscriptions>;

    fn manager(clock: &Arc<FixedClock>) -> Manager {
        LifecycleManager::new(
            Arc::new(config()),
            InMemoryStore::default(),
            InMemorySubscriptions::new(),
        )
        .with_clock(clock.clone())
    }

    fn registered(clock: &Arc<FixedClock>) -> Manager {
        let mut manager = manager(clock);
        let toc = Pathway::new("toc").unwrap();
        manager.register_definition(&toc, TOC).unwrap();
        manager.register_xds_meta(&toc, META).unwrap();
        manager
    }

    fn new_event(task_id: &str, expression: &str, uid: &str, at: DateTime<Utc>) -> NewEvent {
        NewEvent {
            creation_time: at,
            pathway: Pathway::new("toc").unwrap(),
            patient: PatientId::new(PATIENT).unwrap(),
            task_id: task_id.into(),
            expression: expression.into(),
            xds_doc_entry_uid: uid.into(),
            repository_unique_id: "1.2.3".into(),
            user: "bob".into(),
            org: "lab".into(),
            role: "scientist".into(),
            comments: String::new(),
        }
    }

    #[test]
    fn test_transfer_of_care_runs_to_closure() {
        let clock = Arc::new(FixedClock::new(t0()));
        let mut manager = registered(&clock);
        manager
            .store_mut()
            .insert_id_map("2.16.840.1.113883.2.1.3.34.9001", "xdsdomain")
            .unwrap();
        let key = key(PATIENT);

        let doc = manager.create(&key, &requester()).unwrap();
        assert_eq!(doc.workflow_status, WorkflowStatus::Open);
        assert_eq!(doc.sequence_number, 1);
        assert_eq!(doc.confidentiality_code, "R");
        assert_eq!(doc.definition_reference, "TOC");
        assert_eq!(doc.author.id.root, "WARD9");
        assert_eq!(doc.patient.extension, PATIENT);

        manager
            .record_event(new_event("1", "labresult", "DOC-99", t0() + Duration::hours(1)))
            .unwrap();
        clock.advance(Duration::hours(2));
        let report = manager.update(&key, &requester()).unwrap();
        assert_eq!(report.outcome.completed_tasks, vec!["1".to_string()]);
        assert!(!report.published);
        let labresult = &report.document.task("1").unwrap().inputs[0].attachment;
        assert_eq!(labresult.identifier, "DOC-99");
        assert_eq!(labresult.home_community_id, "2.16.840.1.113883.2.1.3.34.9001");
        assert_eq!(report.document.workflow_status, WorkflowStatus::InProgress);

        manager
            .record_event(new_event("2", "summary", "", t0() + Duration::hours(3)))
            .unwrap();
        clock.advance(Duration::hours(2));
        let consumed = manager.consume(&key, &requester()).unwrap();
        assert_eq!(consumed.document.workflow_status, WorkflowStatus::Closed);
        assert_eq!(consumed.document.sequence_number, 3);
        assert!(!consumed.state.is_overdue);
        assert_eq!(consumed.state.latest_event_time, t0() + Duration::hours(3));
        assert_eq!(consumed.tasks.len(), 2);
        assert_eq!(
            consumed.dashboard,
            Dashboard {
                total: 1,
                in_progress: 0,
                complete: 1,
                target_met: 1,
                target_missed: 0,
            }
        );
        assert!(manager.active_pathways().unwrap().is_empty());
    }

    #[test]
    fn test_recreate_deprecates_previous_instance() {
        let clock = Arc::new(FixedClock::new(t0()));
        let mut manager = registered(&clock);
        let key = key(PATIENT);

        let first = manager.create(&key, &requester()).unwrap();
        manager
            .record_event(new_event("1", "labresult", "DOC-1", t0()))
            .unwrap();
        manager.update(&key, &requester()).unwrap();
        let first_row = manager.current_row(&key).unwrap();

        clock.advance(Duration::hours(1));
        let second = manager.create(&key, &requester()).unwrap();
        assert_ne!(first.workflow_instance_id, second.workflow_instance_id);

        let all = manager
            .store()
            .select_workflows(&WorkflowFilter::default())
            .unwrap();
        assert_eq!(all.len(), 2);
        let old = all.iter().find(|r| r.id == first_row.id).unwrap();
        assert_eq!(old.version, 1);
        assert_eq!(old.document, first_row.document);

        // The first instance's events do not leak into the second.
        let report = manager.update(&key, &requester()).unwrap();
        assert!(!report.outcome.changed());
        assert_eq!(report.document.sequence_number, 1);
        assert_eq!(manager.active_pathways().unwrap(), vec![key.pathway.clone()]);
    }

    #[test]
    fn test_create_requires_definition_and_metadata() {
        let clock = Arc::new(FixedClock::new(t0()));
        let mut manager = manager(&clock);
        let key = key(PATIENT);

        let err = manager.create(&key, &requester()).unwrap_err();
        assert!(matches!(err, CoreError::MissingDefinition(_)));
        assert_eq!(err.kind(), ErrorKind::Configuration);

        manager.register_definition(&key.pathway, TOC).unwrap();
        let err = manager.create(&key, &requester()).unwrap_err();
        assert!(matches!(err, CoreError::MissingMetadata(_)));

        assert!(manager
            .store()
            .select_workflows(&WorkflowFilter::default())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_empty_payload_writes_nothing() {
        let clock = Arc::new(FixedClock::new(t0()));
        let mut manager = manager(&clock);
        let toc = Pathway::new("toc").unwrap();

        let err = manager.register_definition(&toc, "  ").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(manager.register_xds_meta(&toc, "").is_err());
        assert!(manager.definition_names(false).unwrap().is_empty());
        assert!(manager.definition_names(true).unwrap().is_empty());
    }

    #[test]
    fn test_reregistration_replaces_subscriptions() {
        let clock = Arc::new(FixedClock::new(t0()));
        let mut manager = manager(&clock);
        let toc = Pathway::new("toc").unwrap();

        let first = manager.register_definition(&toc, TOC).unwrap();
        assert_eq!(first.cancelled_subscriptions, 0);
        assert_eq!(first.subscriptions.len(), 1);
        assert_eq!(first.subscriptions[0].expression, "labresult");
        assert_eq!(first.subscriptions[0].topic, DSUB_TOPIC_TYPE_CODE);
        assert!(first.malformed_clauses.is_empty());

        let second = manager.register_definition(&toc, TOC).unwrap();
        assert_eq!(second.cancelled_subscriptions, 1);
        assert_eq!(second.subscriptions.len(), 1);
        assert_eq!(
            manager
                .subscriptions()
                .select(&SubscriptionFilter::default())
                .unwrap()
                .len(),
            1
        );
        assert_eq!(manager.definition_names(false).unwrap(), vec!["toc".to_string()]);
    }

    #[test]
    fn test_malformed_clauses_are_reported_not_rejected() {
        let clock = Arc::new(FixedClock::new(t0()));
        let mut manager = manager(&clock);
        let toc = Pathway::new("toc").unwrap();
        let payload = TOC.replace("task(1) and task(2)", "task(1) and input(labresult");

        let report = manager.register_definition(&toc, &payload).unwrap();
        assert_eq!(report.malformed_clauses.len(), 1);
        assert!(report.malformed_clauses[0].starts_with("workflow: "));
    }

    #[test]
    fn test_update_without_new_events_writes_nothing() {
        let clock = Arc::new(FixedClock::new(t0()));
        let mut manager = registered(&clock);
        let key = key(PATIENT);
        manager.create(&key, &requester()).unwrap();
        manager.mark_published(&key).unwrap();

        let report = manager.update(&key, &requester()).unwrap();
        assert!(report.published);
        assert!(manager.current_row(&key).unwrap().published);

        manager
            .record_event(new_event("2", "summary", "", t0()))
            .unwrap();
        let report = manager.update(&key, &requester()).unwrap();
        assert!(!report.published);
        assert!(!manager.current_row(&key).unwrap().published);
    }

    #[test]
    fn test_open_workflow_is_overdue_after_target() {
        let clock = Arc::new(FixedClock::new(t0()));
        let mut manager = registered(&clock);
        let key = key(PATIENT);
        manager.create(&key, &requester()).unwrap();

        clock.advance(Duration::hours(47));
        let consumed = manager.consume(&key, &requester()).unwrap();
        assert!(!consumed.state.is_overdue);
        assert_eq!(consumed.dashboard.target_missed, 0);

        clock.advance(Duration::hours(2));
        let consumed = manager.consume(&key, &requester()).unwrap();
        assert!(consumed.state.is_overdue);
        assert_eq!(consumed.state.time_remaining, "0");
        assert_eq!(consumed.dashboard.target_missed, 1);
        assert_eq!(consumed.dashboard.in_progress, 1);
    }

    #[test]
    fn test_task_notes_come_from_event_comments() {
        let clock = Arc::new(FixedClock::new(t0()));
        let mut manager = registered(&clock);
        let key = key(PATIENT);
        manager.create(&key, &requester()).unwrap();

        let mut noted = new_event("1", "labresult", "DOC-7", t0());
        noted.comments = "haemolysed sample, repeat".into();
        manager.record_event(noted).unwrap();

        assert_eq!(
            manager.task_notes(&key, "1").unwrap(),
            vec!["haemolysed sample, repeat".to_string()]
        );
        let consumed = manager.consume(&key, &requester()).unwrap();
        assert_eq!(consumed.tasks[0].notes.len(), 1);
        assert!(consumed.tasks[1].notes.is_empty());
    }

    #[test]
    fn test_execute_dispatches_requests() {
        let clock = Arc::new(FixedClock::new(t0()));
        let mut manager = manager(&clock);
        let pathway = Pathway::new("toc").unwrap();

        let response = manager
            .execute(XdwRequest::RegisterDefinition {
                pathway: pathway.clone(),
                payload: TOC.into(),
            })
            .unwrap();
        assert!(matches!(response, XdwResponse::Registered(r) if r.tasks == 2));

        manager
            .execute(XdwRequest::RegisterXdsMeta {
                pathway,
                payload: META.into(),
            })
            .unwrap();
        let response = manager
            .execute(XdwRequest::Create {
                key: key(PATIENT),
                requester: requester(),
            })
            .unwrap();
        assert!(matches!(response, XdwResponse::Created(doc) if doc.tasks.len() == 2));
    }

    #[test]
    fn test_record_event_requires_task_and_expression() {
        let clock = Arc::new(FixedClock::new(t0()));
        let mut manager = manager(&clock);
        let err = manager
            .record_event(new_event("", "labresult", "", t0()))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
}
