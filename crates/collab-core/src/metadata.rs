//! Versioned engine state stored in the notebook's metadata side-table.
//!
//! Everything the engine needs to survive a close/reopen cycle lives under a
//! single metadata key: the pending update list and the set of cells already
//! updated once. Reads degrade to an empty default on corruption rather than
//! failing the load; a bad state entry must never make a notebook unopenable.

use crate::notebook::{Notebook, Result};
use crate::pending::PendingUpdate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Metadata key the engine state is stored under.
pub const STATE_KEY: &str = "collab";

/// Current state schema version.
pub const STATE_VERSION: u32 = 1;

/// Persistent engine state for one notebook.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CollabState {
    pub version: u32,
    /// Updates received but not yet applied, in arrival order.
    #[serde(default)]
    pub pending: Vec<PendingUpdate>,
    /// Original ids of cells that have received at least one applied update.
    #[serde(default)]
    pub updated_cells: BTreeSet<String>,
}

impl CollabState {
    pub fn new() -> Self {
        Self {
            version: STATE_VERSION,
            ..Default::default()
        }
    }
}

/// Read the engine state from the notebook's metadata.
///
/// Handles three shapes: the current versioned object, the legacy bare array
/// of pending updates (migrated in place on the next write), and garbage
/// (logged, replaced with the default).
pub async fn read_state(notebook: &dyn Notebook) -> Result<CollabState> {
    let Some(raw) = notebook.read_metadata(STATE_KEY).await else {
        return Ok(CollabState::new());
    };

    if raw.is_array() {
        // Legacy layout: a bare array of pending updates, no version wrapper
        match serde_json::from_value::<Vec<PendingUpdate>>(raw) {
            Ok(pending) => {
                debug!(
                    notebook_id = %notebook.notebook_id(),
                    count = pending.len(),
                    "Migrating legacy pending-update array"
                );
                return Ok(CollabState {
                    version: STATE_VERSION,
                    pending,
                    updated_cells: BTreeSet::new(),
                });
            }
            Err(e) => {
                warn!(
                    notebook_id = %notebook.notebook_id(),
                    "Discarding unreadable legacy state: {e}"
                );
                return Ok(CollabState::new());
            }
        }
    }

    match serde_json::from_value::<CollabState>(raw) {
        Ok(state) => Ok(state),
        Err(e) => {
            warn!(
                notebook_id = %notebook.notebook_id(),
                "Discarding corrupt engine state: {e}"
            );
            Ok(CollabState::new())
        }
    }
}

/// Write the engine state back to the notebook's metadata.
pub async fn write_state(notebook: &dyn Notebook, state: &CollabState) -> Result<()> {
    let value = serde_json::to_value(state).map_err(|e| {
        crate::notebook::NotebookError::Metadata(format!("state serialization failed: {e}"))
    })?;
    notebook.write_metadata(STATE_KEY, value).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notebook::InMemoryNotebook;
    use crate::wire::SenderType;
    use serde_json::json;

    fn update(id: &str) -> PendingUpdate {
        PendingUpdate {
            id: id.to_string(),
            message: json!({"action": "update_cell", "content": {"id": id}}),
            time_received: 1_700_000_000_000,
            sender: "teacher-1".into(),
            sender_type: SenderType::Teacher,
            update_id: Some(id.to_string()),
            cell_id: Some(id.to_string()),
        }
    }

    #[tokio::test]
    async fn test_missing_state_defaults() {
        let notebook = InMemoryNotebook::new("nb1");
        let state = read_state(&notebook).await.unwrap();
        assert_eq!(state.version, STATE_VERSION);
        assert!(state.pending.is_empty());
        assert!(state.updated_cells.is_empty());
    }

    #[tokio::test]
    async fn test_roundtrip() {
        let notebook = InMemoryNotebook::new("nb1");
        let mut state = CollabState::new();
        state.pending.push(update("u1"));
        state.updated_cells.insert("o1".into());

        write_state(&notebook, &state).await.unwrap();
        let loaded = read_state(&notebook).await.unwrap();
        assert_eq!(loaded, state);
    }

    #[tokio::test]
    async fn test_legacy_array_migrates() {
        let notebook = InMemoryNotebook::new("nb1");
        let legacy = serde_json::to_value(vec![update("u1"), update("u2")]).unwrap();
        notebook.write_metadata(STATE_KEY, legacy).await.unwrap();

        let state = read_state(&notebook).await.unwrap();
        assert_eq!(state.version, STATE_VERSION);
        assert_eq!(state.pending.len(), 2);
        assert!(state.updated_cells.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_state_degrades_to_default() {
        let notebook = InMemoryNotebook::new("nb1");
        notebook
            .write_metadata(STATE_KEY, json!({"version": "not a number"}))
            .await
            .unwrap();

        let state = read_state(&notebook).await.unwrap();
        assert_eq!(state, CollabState::new());
    }

    #[tokio::test]
    async fn test_corrupt_legacy_array_degrades_to_default() {
        let notebook = InMemoryNotebook::new("nb1");
        notebook
            .write_metadata(STATE_KEY, json!([{"id": 42}]))
            .await
            .unwrap();

        let state = read_state(&notebook).await.unwrap();
        assert_eq!(state, CollabState::new());
    }
}
