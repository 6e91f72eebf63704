//! Aggregate counts over a set of workflow instances.

use crate::store::WorkflowRow;
use crate::timing::is_workflow_overdue;
use chrono::{DateTime, Utc};
use serde::Serialize;
use xdw::{Definition, Document, WorkflowStatus};

/// Status-bucket counts for a set of instances.
///
/// Every instance is in exactly one of `in_progress`/`complete`. Overdue instances count as
/// `target_missed`; closed instances that are not overdue count as `target_met`; open instances
/// that are not yet overdue are in neither target bucket.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Dashboard {
    pub total: usize,
    pub in_progress: usize,
    pub complete: usize,
    pub target_met: usize,
    pub target_missed: usize,
}

impl Dashboard {
    /// Fold workflow rows into counts as of `now`.
    ///
    /// Rows whose document or definition snapshot cannot be read are counted in `total` only.
    pub fn from_rows<'a>(rows: impl IntoIterator<Item = &'a WorkflowRow>, now: DateTime<Utc>) -> Self {
        let mut dashboard = Self::default();
        for row in rows {
            dashboard.total += 1;

            let parsed = Document::parse(&row.document)
                .and_then(|doc| Definition::parse(&row.definition).map(|def| (doc, def)));
            let (document, definition) = match parsed {
                Ok(parsed) => parsed,
                Err(err) => {
                    tracing::warn!(
                        pathway = %row.pathway,
                        patient = %row.patient,
                        "excluding unreadable workflow from dashboard: {err}"
                    );
                    continue;
                }
            };

            dashboard.record(
                document.workflow_status,
                is_workflow_overdue(&document, &definition, now),
            );
        }
        dashboard
    }

    fn record(&mut self, status: WorkflowStatus, overdue: bool) {
        if status.is_active() {
            self.in_progress += 1;
        } else {
            self.complete += 1;
        }

        if overdue {
            self.target_missed += 1;
        } else if status == WorkflowStatus::Closed {
            self.target_met += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{scenario_definition, scenario_document, t0, workflow_row};
    use chrono::Duration;
    use xdw::{TaskEvent, TaskEventStatus};

    #[test]
    fn test_buckets() {
        let mut definition = scenario_definition(&[]);
        definition.complete_by = Some("day(2)".into());

        let open = scenario_document(&definition);

        let mut closed_on_time = scenario_document(&definition);
        closed_on_time.workflow_status = WorkflowStatus::Closed;

        let mut closed_late = scenario_document(&definition);
        closed_late.workflow_status = WorkflowStatus::Closed;
        closed_late.tasks[0].event_history.push(TaskEvent {
            id: Some(3),
            event_time: t0() + Duration::hours(60),
            identifier: "1".into(),
            event_type: "intake".into(),
            status: TaskEventStatus::Recorded,
        });

        let mut in_progress = scenario_document(&definition);
        in_progress.workflow_status = WorkflowStatus::InProgress;

        let mut unreadable = workflow_row(&open, &definition, "5");
        unreadable.document = "not: [a document".into();

        let rows = vec![
            workflow_row(&open, &definition, "1"),
            workflow_row(&closed_on_time, &definition, "2"),
            workflow_row(&closed_late, &definition, "3"),
            workflow_row(&in_progress, &definition, "4"),
            unreadable,
        ];

        let at_one_day = Dashboard::from_rows(&rows, t0() + Duration::hours(24));
        assert_eq!(
            at_one_day,
            Dashboard {
                total: 5,
                in_progress: 2,
                complete: 2,
                target_met: 1,
                target_missed: 1,
            }
        );

        let at_three_days = Dashboard::from_rows(&rows, t0() + Duration::hours(72));
        assert_eq!(at_three_days.target_missed, 3);
        assert_eq!(at_three_days.target_met, 1);
    }

    #[test]
    fn test_empty() {
        assert_eq!(Dashboard::from_rows(&[], t0()), Dashboard::default());
    }
}
