//! JSON snapshot of engine state between CLI invocations.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use xdw_core::{InMemoryStore, InMemorySubscriptions};

/// Everything the CLI persists: the store collections and the issued subscriptions.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub store: InMemoryStore,
    #[serde(default)]
    pub subscriptions: InMemorySubscriptions,
}

impl Snapshot {
    /// Load the snapshot at `path`, or an empty one if the file does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::debug!("no state file at {}, starting empty", path.display());
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read state file {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("failed to parse state file {}", path.display()))
    }

    /// Write the snapshot to `path`, creating parent directories as needed.
    ///
    /// The file is written beside its final location and renamed into place.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, json)
            .with_context(|| format!("failed to write {}", staging.display()))?;
        fs::rename(&staging, path)
            .with_context(|| format!("failed to replace state file {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;
    use xdw_core::store::IdMapFilter;
    use xdw_core::{CoreConfig, LifecycleManager, WorkflowStore};
    use xdw_types::Pathway;

    const DEFINITION: &str = r#"{
        "ref": "toc",
        "tasks": [{"id": "1", "input": [{"name": "labresult", "accesstype": "XDSregistered"}]}]
    }"#;

    fn config() -> Arc<CoreConfig> {
        Arc::new(
            CoreConfig::new(
                "/eventservice/event".into(),
                "xdsdomain".into(),
                "2.16.840.1.113883.2.1.4.1".into(),
                String::new(),
                String::new(),
            )
            .unwrap(),
        )
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let snapshot = Snapshot::load(&dir.path().join("state.json")).unwrap();
        assert!(snapshot
            .store
            .select_id_maps(&IdMapFilter::default())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn state_survives_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("state.json");

        let snapshot = Snapshot::load(&path).unwrap();
        let mut manager = LifecycleManager::new(config(), snapshot.store, snapshot.subscriptions);
        manager
            .register_definition(&Pathway::new("toc").unwrap(), DEFINITION)
            .unwrap();
        manager
            .store_mut()
            .insert_id_map("2.16.840.1.113883.2.1.3.34.9001", "xdsdomain")
            .unwrap();
        let (store, subscriptions) = manager.into_parts();
        Snapshot {
            store,
            subscriptions,
        }
        .save(&path)
        .unwrap();

        let reloaded = Snapshot::load(&path).unwrap();
        let manager = LifecycleManager::new(config(), reloaded.store, reloaded.subscriptions);
        assert_eq!(manager.definition_names(false).unwrap(), vec!["toc".to_string()]);
        assert_eq!(
            manager
                .store()
                .select_id_maps(&IdMapFilter::mapped("xdsdomain"))
                .unwrap()
                .len(),
            1
        );
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn corrupt_file_names_the_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{not json").unwrap();

        let err = Snapshot::load(&path).unwrap_err();
        assert!(err.to_string().contains("state.json"));
    }
}
