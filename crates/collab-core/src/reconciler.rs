//! Update reconciliation: merging a remote cell update into the local
//! document without losing the recipient's prior work.
//!
//! The first update ever applied to a given original id duplicates the local
//! cell above the target (tagged "YOUR CODE") before overwriting; later
//! updates overwrite directly. Updates whose target no longer exists append
//! at the end of the document rather than being dropped.

use crate::events::{CollabEvent, EventBus};
use crate::identity::IdentityMapping;
use crate::notebook::{Cell, CellType, Notebook, NotebookError};
use crate::pending::{PendingUpdate, PendingUpdateStore};
use crate::wire::{self, UpdatePayload};
use chrono::{DateTime, SecondsFormat, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Malformed update payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error(transparent)]
    Notebook(#[from] NotebookError),
}

pub type Result<T> = std::result::Result<T, ReconcileError>;

/// Marker prefix for the preserved copy of the recipient's own work.
pub fn preservation_marker(cell_type: CellType) -> &'static str {
    match cell_type {
        CellType::Code => "# YOUR CODE\n\n",
        CellType::Markdown => "<!-- YOUR CODE -->\n\n",
    }
}

/// Received-timestamp marker line prepended to applied update content.
/// Comment syntax adapts to the cell type.
pub fn timestamp_marker(cell_type: CellType, received_ms: u64) -> String {
    let timestamp = DateTime::<Utc>::from_timestamp_millis(received_ms as i64)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Secs, true);
    match cell_type {
        CellType::Code => format!("# Updated {timestamp}\n\n"),
        CellType::Markdown => format!("<!-- Updated {timestamp} -->\n\n"),
    }
}

/// Applies remote updates into one document.
///
/// Mutations are awaited to completion one at a time, so queued applications
/// are serialized by construction.
pub struct Reconciler<N: Notebook> {
    notebook: Arc<N>,
    store: Arc<PendingUpdateStore<N>>,
    bus: Arc<EventBus>,
}

impl<N: Notebook> Reconciler<N> {
    pub fn new(notebook: Arc<N>, store: Arc<PendingUpdateStore<N>>, bus: Arc<EventBus>) -> Self {
        Self {
            notebook,
            store,
            bus,
        }
    }

    /// Apply one pending update into the document.
    ///
    /// Errors abort this update only; the store is untouched on failure so
    /// the update can be retried (callers remove it only after Ok).
    pub async fn apply(&self, update: &PendingUpdate) -> Result<()> {
        let payload: UpdatePayload = serde_json::from_value(update.message.clone())?;
        let entries = payload.cell_entries();
        if entries.is_empty() {
            warn!(id = %update.id, "Update payload carries no cell entries");
            return Ok(());
        }
        for entry in entries {
            self.apply_entry(entry, update.time_received).await?;
        }
        Ok(())
    }

    /// Apply a single cell entry. The mapping is recomputed per entry so a
    /// whole-notebook payload sees its own earlier insertions.
    async fn apply_entry(&self, entry: &serde_json::Value, received_ms: u64) -> Result<()> {
        let original_id = wire::entry_cell_id(entry).unwrap_or_else(|| {
            let id = wire::fallback_cell_id();
            warn!("Cell entry carries no id, synthesizing {id}");
            id
        });
        let cell_type = wire::entry_cell_type(entry);
        let stamped = format!(
            "{}{}",
            timestamp_marker(cell_type, received_ms),
            wire::entry_source(entry)
        );

        let cells = self.notebook.cells().await?;
        let mapping = IdentityMapping::compute(&cells);

        match mapping.last_index_of(&original_id) {
            None => {
                // Target deleted or never existed locally. Never lose remote
                // content: append it as a fresh cell at the end.
                info!(
                    notebook_id = %self.notebook.notebook_id(),
                    cell_id = %original_id,
                    "Target cell not found, appending update at end"
                );
                let cell = Cell {
                    id: wire::fallback_cell_id(),
                    cell_type,
                    source: stamped,
                    original_id: Some(original_id.clone()),
                };
                self.notebook.append_cell(cell).await?;
            }
            Some(index) => {
                if !self.store.is_updated(&original_id).await? {
                    self.first_update(index, &cells[index], &original_id, &stamped)
                        .await?;
                } else {
                    debug!(cell_id = %original_id, "Repeat update, overwriting in place");
                    self.notebook.set_source(index, &stamped).await?;
                }
            }
        }

        self.bus.emit(CollabEvent::UpdateApplied {
            cell_id: original_id,
        });
        Ok(())
    }

    /// First update to this original id: preserve the recipient's work in a
    /// duplicate above the target, then overwrite the target.
    async fn first_update(
        &self,
        index: usize,
        existing: &Cell,
        original_id: &str,
        stamped: &str,
    ) -> Result<()> {
        debug!(cell_id = %original_id, "First update, duplicating prior work above");
        let preserved = Cell {
            id: wire::fallback_cell_id(),
            cell_type: existing.cell_type,
            source: format!(
                "{}{}",
                preservation_marker(existing.cell_type),
                existing.source
            ),
            // The copy shares the original id; the mapping's last-occurrence
            // rule keeps updates landing on the overwritten cell below it.
            original_id: Some(existing.origin().to_string()),
        };
        self.notebook.insert_cell_above(index, preserved).await?;
        // The target shifted down by one
        self.notebook.set_source(index + 1, stamped).await?;
        self.store.mark_updated(original_id).await?;
        self.notebook.focus_cell(index + 1).await?;
        Ok(())
    }

    /// Drop updated-cells entries whose preserved duplicate is gone.
    ///
    /// When the user deletes the "YOUR CODE" copy, the original id occurs
    /// only once again and its next update should re-run the preservation
    /// step. Call after any structural document change.
    pub async fn prune_updated_cells(&self) -> Result<()> {
        let cells = self.notebook.cells().await?;
        let mapping = IdentityMapping::compute(&cells);
        let state = crate::metadata::read_state(&*self.notebook).await?;
        for original_id in &state.updated_cells {
            if mapping.count_of(original_id) < 2 {
                debug!(cell_id = %original_id, "Preserved duplicate gone, forgetting update history");
                self.store.forget_updated(original_id).await?;
            }
        }
        Ok(())
    }
}
