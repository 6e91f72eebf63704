//! Event reconciliation.
//!
//! Merges a batch of external events into a workflow document. Each event fills one input or
//! output part of one task; once the batch is applied, completion conditions are re-evaluated
//! for every open task and then for the workflow.
//!
//! Every step is individually idempotent. An event whose id is already in a task history, or
//! whose identifier is already on the part it targets, changes nothing. A partially applied batch
//! can therefore be retried with the same events.

use crate::condition::CompletionBehavior;
use crate::config::CoreConfig;
use crate::constants::CLOSED_EVENT_TYPE;
use crate::state::{advance_workflow, close_workflow, complete_task, start_task};
use crate::store::Event;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use xdw::{
    AccessType, DocumentEvent, TaskEvent, TaskEventStatus, TaskStatus, WorkflowDefinition,
    WorkflowDocument, WorkflowStatus,
};

/// Why an event was not applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The event id is already in a task history.
    AlreadyRecorded,
    /// No task in the document has the event's task id.
    UnknownTask,
    /// The task has no input or output part named by the event's expression.
    NoMatchingPart,
    /// The part already carries the identifier this event would write.
    IdentifierUnchanged,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SkippedEvent {
    pub event_id: u64,
    pub reason: SkipReason,
}

/// What a reconciliation pass did to a document.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileOutcome {
    /// Ids of events applied, in application order.
    pub applied: Vec<u64>,
    pub skipped: Vec<SkippedEvent>,
    /// Tasks promoted to COMPLETE, including those forced by closure.
    pub completed_tasks: Vec<String>,
    /// Whether this pass closed the workflow.
    pub closed: bool,
}

impl ReconcileOutcome {
    pub fn changed(&self) -> bool {
        !self.applied.is_empty() || !self.completed_tasks.is_empty() || self.closed
    }
}

/// Applies events to documents.
pub struct Reconciler<'a> {
    config: &'a CoreConfig,
    home_community_id: String,
}

impl<'a> Reconciler<'a> {
    /// # Arguments
    ///
    /// * `config` - Engine configuration; supplies the event-service back-reference base.
    /// * `home_community_id` - Community id stamped on every attachment this reconciler writes.
    pub fn new(config: &'a CoreConfig, home_community_id: impl Into<String>) -> Self {
        Self {
            config,
            home_community_id: home_community_id.into(),
        }
    }

    /// Apply `events` to `document` and re-evaluate completion.
    ///
    /// Events are applied in id order regardless of the order given. The sequence number is
    /// incremented once per applied event. If the workflow closes, the closing history entry is
    /// attributed to `actor` at `now`.
    pub fn apply(
        &self,
        document: &mut WorkflowDocument,
        definition: &WorkflowDefinition,
        events: &[Event],
        actor: &str,
        now: DateTime<Utc>,
    ) -> ReconcileOutcome {
        let mut outcome = ReconcileOutcome::default();

        let mut ordered: Vec<&Event> = events.iter().collect();
        ordered.sort_by_key(|e| e.id);

        for event in ordered {
            match self.apply_event(document, event) {
                Ok(()) => outcome.applied.push(event.id),
                Err(reason) => {
                    tracing::info!(
                        event = event.id,
                        task = %event.task_id,
                        expression = %event.expression,
                        "skipping event: {reason:?}"
                    );
                    outcome.skipped.push(SkippedEvent {
                        event_id: event.id,
                        reason,
                    });
                }
            }
        }

        outcome.completed_tasks = promote_tasks(document, definition);

        let workflow_behaviour = CompletionBehavior::from_conditions(&definition.completion_behavior);
        if document.workflow_status != WorkflowStatus::Closed
            && workflow_behaviour.evaluate_workflow(document)
        {
            let previous = document.last_recorded_status();
            if let Some(forced) = close_workflow(document) {
                tracing::info!(
                    workflow = %document.workflow_instance_id,
                    forced = forced.len(),
                    "workflow closed"
                );
                document.status_history.push(DocumentEvent {
                    event_time: now,
                    event_type: CLOSED_EVENT_TYPE.to_string(),
                    task_event_identifier: String::new(),
                    author: actor.to_string(),
                    previous_status: Some(previous),
                    actual_status: WorkflowStatus::Closed,
                });
                outcome.completed_tasks.extend(forced);
                outcome.closed = true;
            }
        }

        outcome
    }

    fn expected_identifier(&self, access_type: AccessType, event: &Event) -> String {
        match access_type {
            AccessType::Registered => event.xds_doc_entry_uid.trim().to_string(),
            AccessType::InlineReference => self.config.event_reference(event.id),
        }
    }

    fn apply_event(&self, document: &mut WorkflowDocument, event: &Event) -> Result<(), SkipReason> {
        if document.has_recorded(event.id) {
            return Err(SkipReason::AlreadyRecorded);
        }

        let author = event.author();
        let task = document
            .task_mut(&event.task_id)
            .ok_or(SkipReason::UnknownTask)?;
        let task_id = task.details.id.clone();
        let task_type = task.details.task_type.clone();

        let part = task
            .part_mut(&event.expression)
            .ok_or(SkipReason::NoMatchingPart)?;
        let identifier = self.expected_identifier(part.attachment.access_type, event);
        if part.attachment.identifier == identifier {
            return Err(SkipReason::IdentifierUnchanged);
        }

        part.attachment.identifier = identifier;
        part.attachment.attached_time = Some(event.creation_time);
        part.attachment.attached_by = author.clone();
        part.attachment.home_community_id = self.home_community_id.clone();

        if event.creation_time > task.details.last_modified_time {
            task.details.last_modified_time = event.creation_time;
        }
        task.details.actual_owner = author.clone();
        start_task(task, event.creation_time);
        task.event_history.push(TaskEvent {
            id: Some(event.id),
            event_time: event.creation_time,
            identifier: task_id.clone(),
            event_type: task_type.clone(),
            status: TaskEventStatus::Recorded,
        });

        document.sequence_number += 1;
        let previous = document.last_recorded_status();
        let actual = advance_workflow(document);
        document.status_history.push(DocumentEvent {
            event_time: event.creation_time,
            event_type: task_type,
            task_event_identifier: task_id,
            author,
            previous_status: Some(previous),
            actual_status: actual,
        });

        tracing::debug!(
            event = event.id,
            sequence = document.sequence_number,
            "applied event to task {}",
            event.task_id
        );
        Ok(())
    }
}

/// Complete every task whose behaviour is now satisfied.
///
/// Runs to a fixpoint so a `task(id)` clause sees tasks completed earlier in the same pass, in
/// whatever order the tasks are declared.
fn promote_tasks(document: &mut WorkflowDocument, definition: &WorkflowDefinition) -> Vec<String> {
    let behaviours: HashMap<&str, CompletionBehavior> = definition
        .tasks
        .iter()
        .map(|t| {
            (
                t.id.as_str(),
                CompletionBehavior::from_conditions(&t.completion_behavior),
            )
        })
        .collect();

    let mut completed = Vec::new();
    loop {
        let ready: Vec<usize> = document
            .tasks
            .iter()
            .enumerate()
            .filter(|(_, task)| task.details.status != TaskStatus::Complete)
            .filter(|(_, task)| {
                behaviours
                    .get(task.details.id.as_str())
                    .is_some_and(|b| b.evaluate_task(task, document))
            })
            .map(|(idx, _)| idx)
            .collect();

        if ready.is_empty() {
            break;
        }
        for idx in ready {
            let task = &mut document.tasks[idx];
            if complete_task(task) {
                tracing::info!(task = %task.details.id, "task completion conditions met");
                completed.push(task.details.id.clone());
            }
        }
    }
    completed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{config, event, scenario_definition, scenario_document, t0};
    use chrono::Duration;
    use xdw::Document;

    #[test]
    fn test_scenario_registered_lab_result_completes_intake() {
        let config = config();
        let definition = scenario_definition(&["task(1) and task(2)"]);
        let mut doc = scenario_document(&definition);
        let reconciler = Reconciler::new(&config, "2.16.840.1.113883.2.1.3.34.9001");

        let ev = event(1, "1", "labresult", "DOC-99", t0() + Duration::hours(1));
        let outcome = reconciler.apply(&mut doc, &definition, &[ev], "alice", t0());

        let intake = doc.task("1").unwrap();
        assert_eq!(outcome.applied, vec![1]);
        assert_eq!(intake.details.status, TaskStatus::Complete);
        assert_eq!(intake.inputs[0].attachment.identifier, "DOC-99");
        assert_eq!(
            intake.inputs[0].attachment.home_community_id,
            "2.16.840.1.113883.2.1.3.34.9001"
        );
        assert_eq!(intake.details.activation_time, Some(t0() + Duration::hours(1)));
        assert_eq!(doc.sequence_number, 2);
        assert_eq!(doc.workflow_status, WorkflowStatus::InProgress);
        assert!(!outcome.closed);
    }

    #[test]
    fn test_scenario_closes_when_workflow_references_task() {
        let config = config();
        let definition = scenario_definition(&["task(1)"]);
        let mut doc = scenario_document(&definition);
        let reconciler = Reconciler::new(&config, "");

        let ev = event(1, "1", "labresult", "DOC-99", t0() + Duration::hours(1));
        let outcome = reconciler.apply(&mut doc, &definition, &[ev], "alice", t0() + Duration::hours(2));

        assert!(outcome.closed);
        assert_eq!(doc.workflow_status, WorkflowStatus::Closed);
        assert!(doc.all_tasks_complete());
        assert_eq!(outcome.completed_tasks, vec!["1".to_string(), "2".to_string()]);

        let closing = doc.status_history.last().unwrap();
        assert_eq!(closing.event_type, CLOSED_EVENT_TYPE);
        assert_eq!(closing.previous_status, Some(WorkflowStatus::InProgress));
        assert_eq!(closing.author, "alice");
        // Closure is not a task event.
        assert_eq!(doc.sequence_number, 2);
    }

    #[test]
    fn test_replaying_an_event_is_byte_identical() {
        let config = config();
        let definition = scenario_definition(&["task(1) and task(2)"]);
        let mut doc = scenario_document(&definition);
        let reconciler = Reconciler::new(&config, "hc");

        let events = vec![
            event(4, "2", "summary", "", t0() + Duration::hours(3)),
            event(2, "1", "labresult", "DOC-99", t0() + Duration::hours(1)),
        ];
        reconciler.apply(&mut doc, &definition, &events, "alice", t0());
        let first = Document::render(&doc).unwrap();

        let replay = reconciler.apply(&mut doc, &definition, &events, "alice", t0());
        assert!(!replay.changed());
        assert_eq!(
            replay.skipped.iter().map(|s| s.reason).collect::<Vec<_>>(),
            vec![SkipReason::AlreadyRecorded, SkipReason::AlreadyRecorded]
        );
        assert_eq!(Document::render(&doc).unwrap(), first);
    }

    #[test]
    fn test_same_artifact_under_new_event_id_is_skipped() {
        let config = config();
        let definition = scenario_definition(&[]);
        let mut doc = scenario_document(&definition);
        let reconciler = Reconciler::new(&config, "");

        let first = event(1, "1", "labresult", "DOC-99", t0());
        let redelivered = event(9, "1", "labresult", "DOC-99", t0() + Duration::minutes(5));
        reconciler.apply(&mut doc, &definition, &[first], "alice", t0());
        let before = doc.clone();

        let outcome = reconciler.apply(&mut doc, &definition, &[redelivered], "alice", t0());
        assert_eq!(outcome.skipped[0].reason, SkipReason::IdentifierUnchanged);
        assert_eq!(doc, before);
    }

    #[test]
    fn test_sequence_increases_per_applied_event() {
        let config = config();
        let definition = scenario_definition(&[]);
        let mut doc = scenario_document(&definition);
        let reconciler = Reconciler::new(&config, "");

        let mut last = doc.sequence_number;
        for (id, expr, uid) in [(1, "labresult", "DOC-1"), (2, "summary", ""), (3, "labresult", "DOC-2")] {
            let task = if expr == "summary" { "2" } else { "1" };
            reconciler.apply(
                &mut doc,
                &definition,
                &[event(id, task, expr, uid, t0() + Duration::minutes(id as i64))],
                "alice",
                t0(),
            );
            assert_eq!(doc.sequence_number, last + 1);
            last = doc.sequence_number;
        }
    }

    #[test]
    fn test_inline_parts_use_event_back_reference() {
        let config = config();
        let definition = scenario_definition(&[]);
        let mut doc = scenario_document(&definition);
        let reconciler = Reconciler::new(&config, "");

        reconciler.apply(
            &mut doc,
            &definition,
            &[event(17, "2", "summary", "ignored", t0())],
            "alice",
            t0(),
        );
        let summary = &doc.task("2").unwrap().outputs[0];
        assert_eq!(
            summary.attachment.identifier,
            "/eventservice/event?act=events&id=17"
        );
        assert_eq!(summary.attachment.attached_by, "alice ward9 nurse");
    }

    #[test]
    fn test_unknown_task_and_expression_are_skipped() {
        let config = config();
        let definition = scenario_definition(&[]);
        let mut doc = scenario_document(&definition);
        let reconciler = Reconciler::new(&config, "");

        let outcome = reconciler.apply(
            &mut doc,
            &definition,
            &[
                event(1, "7", "labresult", "DOC-1", t0()),
                event(2, "1", "xray", "DOC-2", t0()),
                event(3, "1", "labresult", "DOC-3", t0()),
            ],
            "alice",
            t0(),
        );
        assert_eq!(outcome.applied, vec![3]);
        assert_eq!(
            outcome.skipped,
            vec![
                SkippedEvent { event_id: 1, reason: SkipReason::UnknownTask },
                SkippedEvent { event_id: 2, reason: SkipReason::NoMatchingPart },
            ]
        );
    }

    #[test]
    fn test_closed_workflow_records_but_never_reopens() {
        let config = config();
        let definition = scenario_definition(&["task(1)"]);
        let mut doc = scenario_document(&definition);
        let reconciler = Reconciler::new(&config, "");

        reconciler.apply(&mut doc, &definition, &[event(1, "1", "labresult", "DOC-1", t0())], "alice", t0());
        assert_eq!(doc.workflow_status, WorkflowStatus::Closed);

        let outcome = reconciler.apply(
            &mut doc,
            &definition,
            &[event(2, "2", "summary", "", t0() + Duration::hours(1))],
            "alice",
            t0(),
        );
        assert_eq!(outcome.applied, vec![2]);
        assert!(!outcome.closed);
        assert_eq!(doc.workflow_status, WorkflowStatus::Closed);
        assert!(doc.all_tasks_complete());
        let last = doc.status_history.last().unwrap();
        assert_eq!(last.actual_status, WorkflowStatus::Closed);
    }

    #[test]
    fn test_promotion_reaches_fixpoint() {
        let config = config();
        // Task 2 is declared after task 1 but task 1 depends on it.
        let mut definition = scenario_definition(&[]);
        definition.tasks[0].completion_behavior = vec!["task(2)".into()];
        definition.tasks[1].completion_behavior = vec!["output(summary)".into()];
        let mut doc = scenario_document(&definition);
        let reconciler = Reconciler::new(&config, "");

        let outcome = reconciler.apply(
            &mut doc,
            &definition,
            &[event(1, "2", "summary", "", t0())],
            "alice",
            t0(),
        );
        assert_eq!(outcome.completed_tasks, vec!["2".to_string(), "1".to_string()]);
    }

    #[test]
    fn test_task_without_behaviour_is_promoted() {
        let config = config();
        let mut definition = scenario_definition(&["task(1) and task(2)"]);
        definition.tasks[1].completion_behavior.clear();
        let mut doc = scenario_document(&definition);
        let reconciler = Reconciler::new(&config, "");

        let outcome = reconciler.apply(
            &mut doc,
            &definition,
            &[event(1, "2", "summary", "", t0())],
            "alice",
            t0(),
        );
        assert_eq!(outcome.completed_tasks, vec!["2".to_string()]);
        assert_eq!(doc.task("2").unwrap().details.status, TaskStatus::Complete);
        assert_eq!(doc.task("1").unwrap().details.status, TaskStatus::Created);
        assert_eq!(doc.workflow_status, WorkflowStatus::InProgress);
    }

    #[test]
    fn test_workflow_without_behaviour_closes_after_reconciliation() {
        let config = config();
        let definition = scenario_definition(&[]);
        let mut doc = scenario_document(&definition);
        let reconciler = Reconciler::new(&config, "");

        let outcome = reconciler.apply(
            &mut doc,
            &definition,
            &[event(1, "1", "labresult", "DOC-99", t0())],
            "alice",
            t0() + Duration::minutes(1),
        );
        assert!(outcome.closed);
        assert_eq!(doc.workflow_status, WorkflowStatus::Closed);
        assert!(doc.all_tasks_complete());
        assert_eq!(outcome.completed_tasks, vec!["1".to_string(), "2".to_string()]);
        assert_eq!(
            doc.status_history.last().unwrap().event_type,
            CLOSED_EVENT_TYPE
        );
    }
}
