use super::{
    DefinitionFilter, DefinitionRow, Event, EventFilter, IdMap, IdMapFilter, NewDefinition,
    NewEvent, NewWorkflow, StoreError, StoreResult, WorkflowFilter, WorkflowKey, WorkflowRow,
    WorkflowStore, WorkflowUpdate,
};
use crate::constants::CURRENT_VERSION;
use serde::{Deserialize, Serialize};

/// Process-local store.
///
/// Serialisable so a caller can snapshot the whole store between runs.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InMemoryStore {
    definitions: Vec<DefinitionRow>,
    workflows: Vec<WorkflowRow>,
    events: Vec<Event>,
    id_maps: Vec<IdMap>,
    last_id: u64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&mut self) -> u64 {
        self.last_id += 1;
        self.last_id
    }
}

impl WorkflowStore for InMemoryStore {
    fn select_definitions(&self, filter: &DefinitionFilter) -> StoreResult<Vec<DefinitionRow>> {
        Ok(self
            .definitions
            .iter()
            .filter(|d| filter.matches(d))
            .cloned()
            .collect())
    }

    fn insert_definition(&mut self, definition: NewDefinition) -> StoreResult<u64> {
        let id = self.next_id();
        self.definitions.push(DefinitionRow {
            id,
            name: definition.name,
            is_xds_meta: definition.is_xds_meta,
            payload: definition.payload,
        });
        Ok(id)
    }

    fn delete_definitions(&mut self, filter: &DefinitionFilter) -> StoreResult<usize> {
        let before = self.definitions.len();
        self.definitions.retain(|d| !filter.matches(d));
        Ok(before - self.definitions.len())
    }

    fn select_workflows(&self, filter: &WorkflowFilter) -> StoreResult<Vec<WorkflowRow>> {
        Ok(self
            .workflows
            .iter()
            .filter(|w| filter.matches(w))
            .cloned()
            .collect())
    }

    fn insert_workflow(&mut self, workflow: NewWorkflow) -> StoreResult<u64> {
        let current = WorkflowFilter::current(&workflow.key);
        if self.workflows.iter().any(|w| current.matches(w)) {
            return Err(StoreError::Conflict(format!(
                "a current workflow already exists for {}",
                workflow.key
            )));
        }

        let id = self.next_id();
        self.workflows.push(WorkflowRow {
            id,
            created: workflow.created,
            pathway: workflow.key.pathway,
            patient: workflow.key.patient,
            instance_id: workflow.instance_id,
            version: CURRENT_VERSION,
            document: workflow.document,
            definition: workflow.definition,
            published: false,
            status: workflow.status,
        });
        Ok(id)
    }

    fn update_workflow(&mut self, update: &WorkflowUpdate) -> StoreResult<()> {
        let row = self
            .workflows
            .iter_mut()
            .find(|w| {
                w.pathway == update.key.pathway
                    && w.patient == update.key.patient
                    && w.version == update.version
            })
            .ok_or_else(|| StoreError::NotFound {
                entity: "workflow",
                key: format!("{} version {}", update.key, update.version),
            })?;

        row.document = update.document.clone();
        row.published = update.published;
        row.status = update.status;
        Ok(())
    }

    fn deprecate_workflows(&mut self, key: &WorkflowKey) -> StoreResult<usize> {
        let mut count = 0;
        for row in self
            .workflows
            .iter_mut()
            .filter(|w| w.pathway == key.pathway && w.patient == key.patient)
        {
            row.version += 1;
            count += 1;
        }
        Ok(count)
    }

    fn select_events(&self, filter: &EventFilter) -> StoreResult<Vec<Event>> {
        let mut events: Vec<Event> = self
            .events
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        events.sort_by_key(|e| e.id);
        Ok(events)
    }

    fn insert_event(&mut self, event: NewEvent) -> StoreResult<u64> {
        let id = self.next_id();
        self.events.push(Event {
            id,
            creation_time: event.creation_time,
            pathway: event.pathway,
            patient: event.patient,
            task_id: event.task_id,
            expression: event.expression,
            xds_doc_entry_uid: event.xds_doc_entry_uid,
            repository_unique_id: event.repository_unique_id,
            user: event.user,
            org: event.org,
            role: event.role,
            comments: event.comments,
            version: CURRENT_VERSION,
        });
        Ok(id)
    }

    fn deprecate_events(&mut self, key: &WorkflowKey) -> StoreResult<usize> {
        let mut count = 0;
        for event in self
            .events
            .iter_mut()
            .filter(|e| e.pathway == key.pathway && e.patient == key.patient)
        {
            event.version += 1;
            count += 1;
        }
        Ok(count)
    }

    fn select_id_maps(&self, filter: &IdMapFilter) -> StoreResult<Vec<IdMap>> {
        Ok(self
            .id_maps
            .iter()
            .filter(|m| filter.matches(m))
            .cloned()
            .collect())
    }

    fn insert_id_map(&mut self, local_id: &str, mapped_id: &str) -> StoreResult<u64> {
        let id = self.next_id();
        self.id_maps.push(IdMap {
            id,
            local_id: local_id.to_string(),
            mapped_id: mapped_id.to_string(),
        });
        Ok(id)
    }

    fn delete_id_maps(&mut self, filter: &IdMapFilter) -> StoreResult<usize> {
        let before = self.id_maps.len();
        self.id_maps.retain(|m| !filter.matches(m));
        Ok(before - self.id_maps.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use xdw::WorkflowStatus;
    use xdw_types::{PatientId, Pathway};

    fn key(patient: &str) -> WorkflowKey {
        WorkflowKey::new(Pathway::new("toc").unwrap(), PatientId::new(patient).unwrap())
    }

    fn new_workflow(key: &WorkflowKey, document: &str) -> NewWorkflow {
        NewWorkflow {
            created: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            key: key.clone(),
            instance_id: "i".into(),
            document: document.into(),
            definition: "{}".into(),
            status: WorkflowStatus::Open,
        }
    }

    fn new_event(key: &WorkflowKey) -> NewEvent {
        NewEvent {
            creation_time: Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap(),
            pathway: key.pathway.clone(),
            patient: key.patient.clone(),
            task_id: "1".into(),
            expression: "labresult".into(),
            xds_doc_entry_uid: String::new(),
            repository_unique_id: String::new(),
            user: String::new(),
            org: String::new(),
            role: String::new(),
            comments: String::new(),
        }
    }

    #[test]
    fn test_one_current_workflow_per_key() {
        let mut store = InMemoryStore::new();
        let k = key("1");
        store.insert_workflow(new_workflow(&k, "a")).unwrap();
        let err = store.insert_workflow(new_workflow(&k, "b")).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        assert_eq!(store.deprecate_workflows(&k).unwrap(), 1);
        store.insert_workflow(new_workflow(&k, "b")).unwrap();

        let current = store.select_workflows(&WorkflowFilter::current(&k)).unwrap();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].document, "b");

        let all = store.select_workflows(&WorkflowFilter::default()).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_deprecation_is_scoped_to_key() {
        let mut store = InMemoryStore::new();
        let (a, b) = (key("1"), key("2"));
        store.insert_event(new_event(&a)).unwrap();
        store.insert_event(new_event(&b)).unwrap();

        assert_eq!(store.deprecate_events(&a).unwrap(), 1);
        assert!(store.select_events(&EventFilter::current(&a)).unwrap().is_empty());
        assert_eq!(store.select_events(&EventFilter::current(&b)).unwrap().len(), 1);
    }

    #[test]
    fn test_update_requires_matching_version() {
        let mut store = InMemoryStore::new();
        let k = key("1");
        store.insert_workflow(new_workflow(&k, "a")).unwrap();

        let update = WorkflowUpdate {
            key: k.clone(),
            version: 3,
            document: "x".into(),
            published: true,
            status: WorkflowStatus::Closed,
        };
        assert!(matches!(
            store.update_workflow(&update),
            Err(StoreError::NotFound { .. })
        ));

        store
            .update_workflow(&WorkflowUpdate {
                version: CURRENT_VERSION,
                ..update
            })
            .unwrap();
        let row = &store.select_workflows(&WorkflowFilter::current(&k)).unwrap()[0];
        assert_eq!(row.document, "x");
        assert!(row.published);
    }

    #[test]
    fn test_event_ids_increase() {
        let mut store = InMemoryStore::new();
        let k = key("1");
        let first = store.insert_event(new_event(&k)).unwrap();
        let second = store.insert_event(new_event(&k)).unwrap();
        assert!(second > first);
    }

    #[test]
    fn test_definitions_delete_by_filter() {
        let mut store = InMemoryStore::new();
        let pathway = Pathway::new("toc").unwrap();
        for (name, meta) in [("toc", false), ("toc_meta", true)] {
            store
                .insert_definition(NewDefinition {
                    name: name.into(),
                    is_xds_meta: meta,
                    payload: "{}".into(),
                })
                .unwrap();
        }

        assert_eq!(
            store
                .delete_definitions(&DefinitionFilter::definition(&pathway))
                .unwrap(),
            1
        );
        let left = store.select_definitions(&DefinitionFilter::default()).unwrap();
        assert_eq!(left.len(), 1);
        assert!(left[0].is_xds_meta);
    }

    #[test]
    fn test_snapshot_keeps_id_sequence() {
        let mut store = InMemoryStore::new();
        let k = key("1");
        let first = store.insert_event(new_event(&k)).unwrap();

        let json = serde_json::to_string(&store).unwrap();
        let mut restored: InMemoryStore = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, store);
        assert!(restored.insert_event(new_event(&k)).unwrap() > first);
    }
}
