//! Flow storage with file persistence.
//!
//! Flows live in memory for fast access, with optional one-file-per-flow
//! JSON persistence for durability across restarts.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::compiler::is_valid_flow_id;
use crate::error::{EngineError, Result};
use crate::types::{Flow, FlowPatch, FlowSummary, NewFlow};

/// In-memory flow store with optional file persistence.
///
/// # Example
///
/// ```ignore
/// let mut store = FlowStore::with_persistence("/var/lib/ivr/flows");
/// let count = store.load_from_disk()?;
/// let flow = store.create(new_flow)?;
/// ```
#[derive(Debug, Default)]
pub struct FlowStore {
    /// Stored flows, keyed by ID.
    flows: HashMap<String, Flow>,
    /// Optional path for file persistence.
    persist_path: Option<PathBuf>,
}

impl FlowStore {
    /// Create a new in-memory store without persistence.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that persists to the given directory.
    ///
    /// The directory is created on first save.
    pub fn with_persistence(path: impl AsRef<Path>) -> Self {
        Self {
            flows: HashMap::new(),
            persist_path: Some(path.as_ref().to_path_buf()),
        }
    }

    /// Load all flows from the persistence directory.
    ///
    /// Returns the number of flows loaded. Unparseable files are skipped.
    pub fn load_from_disk(&mut self) -> Result<usize> {
        let Some(ref path) = self.persist_path else {
            return Ok(0);
        };

        if !path.exists() {
            return Ok(0);
        }

        let mut count = 0;
        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            let file_path = entry.path();

            if file_path.extension().is_some_and(|e| e == "json") {
                let content = std::fs::read_to_string(&file_path)?;
                match serde_json::from_str::<Flow>(&content) {
                    Ok(flow) if !is_valid_flow_id(&flow.id) => {
                        log::warn!("Skipping flow with invalid ID '{}' in {:?}", flow.id, file_path);
                    }
                    Ok(flow) => {
                        log::info!("Loaded flow '{}' from {:?}", flow.id, file_path);
                        self.flows.insert(flow.id.clone(), flow);
                        count += 1;
                    }
                    Err(e) => {
                        log::warn!("Failed to parse flow from {:?}: {}", file_path, e);
                    }
                }
            }
        }
        Ok(count)
    }

    fn file_path(dir: &Path, id: &str) -> PathBuf {
        dir.join(format!("{}.json", id))
    }

    /// Save a flow to disk (if persistence is enabled).
    fn save_to_disk(&self, flow: &Flow) -> Result<()> {
        let Some(ref path) = self.persist_path else {
            return Ok(());
        };

        std::fs::create_dir_all(path)?;
        let file_path = Self::file_path(path, &flow.id);
        let content = serde_json::to_string_pretty(flow)?;
        std::fs::write(&file_path, content)?;
        log::debug!("Saved flow '{}' to {:?}", flow.id, file_path);
        Ok(())
    }

    /// Delete a flow from disk (if persistence is enabled).
    fn delete_from_disk(&self, id: &str) -> Result<()> {
        let Some(ref path) = self.persist_path else {
            return Ok(());
        };

        let file_path = Self::file_path(path, id);
        if file_path.exists() {
            std::fs::remove_file(&file_path)?;
            log::debug!("Deleted flow '{}' from {:?}", id, file_path);
        }
        Ok(())
    }

    /// Create a draft flow with a fresh ID.
    pub fn create(&mut self, new_flow: NewFlow) -> Result<Flow> {
        let mut flow = Flow::new(
            uuid::Uuid::new_v4().to_string(),
            new_flow.name,
            new_flow.created_by,
        );
        flow.description = new_flow.description;
        flow.blocks = new_flow.blocks;
        flow.connections = new_flow.connections;
        flow.metadata = new_flow.metadata;

        self.save_to_disk(&flow)?;
        self.flows.insert(flow.id.clone(), flow.clone());
        log::info!("Created flow '{}' for '{}'", flow.id, flow.created_by);
        Ok(flow)
    }

    /// Insert a flow with a caller-chosen ID. Fails if the ID is taken.
    pub fn insert(&mut self, flow: Flow) -> Result<()> {
        if self.flows.contains_key(&flow.id) {
            return Err(EngineError::DuplicateFlow(flow.id));
        }
        self.save(flow)
    }

    /// Insert or replace a flow.
    pub fn save(&mut self, flow: Flow) -> Result<()> {
        if !is_valid_flow_id(&flow.id) {
            return Err(EngineError::InvalidFlowId(flow.id));
        }
        self.save_to_disk(&flow)?;
        self.flows.insert(flow.id.clone(), flow);
        Ok(())
    }

    /// Get a flow by ID.
    pub fn get(&self, id: &str) -> Option<&Flow> {
        self.flows.get(id)
    }

    /// List flows created by an owner, most recently updated first.
    pub fn list_by_owner(&self, owner_id: &str) -> Vec<FlowSummary> {
        let mut flows: Vec<&Flow> = self
            .flows
            .values()
            .filter(|f| f.created_by == owner_id)
            .collect();
        flows.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        flows.into_iter().map(FlowSummary::from).collect()
    }

    /// Apply a patch to a flow.
    pub fn update(&mut self, id: &str, patch: FlowPatch) -> Result<Flow> {
        let mut flow = self
            .flows
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::not_found(id))?;
        patch.apply_to(&mut flow);
        self.save(flow.clone())?;
        Ok(flow)
    }

    /// Remove a flow owned by `owner_id`.
    ///
    /// Returns the removed flow.
    pub fn delete(&mut self, id: &str, owner_id: &str) -> Result<Flow> {
        let flow = self.flows.get(id).ok_or_else(|| EngineError::not_found(id))?;
        if flow.created_by != owner_id {
            return Err(EngineError::Forbidden {
                flow_id: id.to_string(),
                owner: flow.created_by.clone(),
                requester: owner_id.to_string(),
            });
        }
        self.delete_from_disk(id)?;
        self.flows
            .remove(id)
            .ok_or_else(|| EngineError::not_found(id))
    }

    /// Check if a flow exists.
    pub fn contains(&self, id: &str) -> bool {
        self.flows.contains_key(id)
    }

    /// Number of stored flows.
    pub fn len(&self) -> usize {
        self.flows.len()
    }

    /// Whether the store holds no flows.
    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Block, BlockKind, Connection, FlowStatus};
    use serde_json::json;
    use tempfile::TempDir;

    fn new_flow(owner: &str) -> NewFlow {
        NewFlow {
            name: "Reception".to_string(),
            description: "Front desk".to_string(),
            blocks: vec![
                Block::new("start", BlockKind::Start),
                Block::with_data("menu", BlockKind::Menu, json!({"prompt": "p", "timeout": 5, "maxDigits": 1})),
                Block::new("end", BlockKind::End),
            ],
            connections: vec![Connection::new("start", "menu"), Connection::labelled("menu", "end", "1")],
            metadata: serde_json::Map::new(),
            created_by: owner.to_string(),
        }
    }

    #[test]
    fn test_in_memory_store() {
        let mut store = FlowStore::new();

        let flow = store.create(new_flow("alice")).unwrap();
        assert_eq!(flow.status, FlowStatus::Draft);
        assert!(store.get(&flow.id).is_some());
        assert!(store.get("nonexistent").is_none());

        let list = store.list_by_owner("alice");
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].block_count, 3);
        assert!(store.list_by_owner("bob").is_empty());

        let removed = store.delete(&flow.id, "alice").unwrap();
        assert_eq!(removed.id, flow.id);
        assert!(store.is_empty());
    }

    #[test]
    fn test_delete_requires_owner() {
        let mut store = FlowStore::new();
        let flow = store.create(new_flow("alice")).unwrap();

        let err = store.delete(&flow.id, "mallory").unwrap_err();
        assert!(matches!(err, EngineError::Forbidden { .. }));
        assert!(store.contains(&flow.id));
    }

    #[test]
    fn test_update_missing_flow() {
        let mut store = FlowStore::new();
        let err = store.update("ghost", FlowPatch::default()).unwrap_err();
        assert!(matches!(err, EngineError::FlowNotFound(_)));
    }

    #[test]
    fn test_insert_rejects_duplicates() {
        let mut store = FlowStore::new();
        store.insert(Flow::new("f", "A", "alice")).unwrap();
        let err = store.insert(Flow::new("f", "B", "alice")).unwrap_err();
        assert!(matches!(err, EngineError::DuplicateFlow(_)));
    }

    #[test]
    fn test_persistent_store_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let persist_path = temp_dir.path().join("flows");

        let original = {
            let mut store = FlowStore::with_persistence(&persist_path);
            let flow = store.create(new_flow("alice")).unwrap();
            store
                .update(
                    &flow.id,
                    FlowPatch {
                        description: Some("Lobby line".to_string()),
                        ..Default::default()
                    },
                )
                .unwrap()
        };

        let mut store = FlowStore::with_persistence(&persist_path);
        let count = store.load_from_disk().unwrap();
        assert_eq!(count, 1);
        assert_eq!(store.get(&original.id), Some(&original));
    }

    #[test]
    fn test_rejects_ids_that_alias_another_file() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = FlowStore::with_persistence(temp_dir.path());

        let mut plain = Flow::new("tenant_x", "Plain", "alice");
        plain.blocks = new_flow("alice").blocks;
        store.insert(plain).unwrap();

        let dotted = Flow::new("tenant.x", "Dotted", "alice");
        assert!(matches!(
            store.insert(dotted),
            Err(EngineError::InvalidFlowId(id)) if id == "tenant.x"
        ));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("tenant_x").unwrap().name, "Plain");

        let mut reloaded = FlowStore::with_persistence(temp_dir.path());
        assert_eq!(reloaded.load_from_disk().unwrap(), 1);
        assert_eq!(reloaded.get("tenant_x").unwrap().name, "Plain");
    }

    #[test]
    fn test_load_skips_garbage() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("broken.json"), "{not json").unwrap();
        std::fs::write(temp_dir.path().join("notes.txt"), "ignored").unwrap();

        let mut store = FlowStore::with_persistence(temp_dir.path());
        assert_eq!(store.load_from_disk().unwrap(), 0);
    }
}
