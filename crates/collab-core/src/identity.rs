//! Identity mapping between original cell ids and current document positions.
//!
//! The mapping is a pure function of the current cell list plus each cell's
//! original-id annotation. It must be recomputed after any structural change
//! (insert, delete, move, paste) before being consulted.

use crate::notebook::Cell;

/// One entry per cell currently in the document, in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingEntry {
    /// The host editor's current id for the cell
    pub cell_id: String,
    /// The stable original id (falls back to `cell_id` when unannotated)
    pub original_id: String,
}

/// Ordered mapping from original cell ids to current positions.
///
/// Duplicate original ids are permitted (duplication-by-copy shares the
/// annotation); lookups distinguish the first and last occurrence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityMapping {
    entries: Vec<MappingEntry>,
}

impl IdentityMapping {
    /// Build the mapping from a cell-list snapshot. Pure; no I/O.
    pub fn compute(cells: &[Cell]) -> Self {
        let entries = cells
            .iter()
            .map(|cell| MappingEntry {
                cell_id: cell.id.clone(),
                original_id: cell.origin().to_string(),
            })
            .collect();
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[MappingEntry] {
        &self.entries
    }

    /// Position of the first cell carrying `original_id` (display labeling
    /// of the preserved copy in the duplicate-above pattern).
    pub fn first_index_of(&self, original_id: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.original_id == original_id)
    }

    /// Position of the last cell carrying `original_id`.
    ///
    /// This is the canonical lookup for update delivery and presence: after
    /// the duplicate-above step the structurally original cell is the most
    /// downstream occurrence, so updates and indicator dots land on the cell
    /// the peer is actually editing, not on the preserved copy.
    pub fn last_index_of(&self, original_id: &str) -> Option<usize> {
        self.entries
            .iter()
            .rposition(|e| e.original_id == original_id)
    }

    /// Number of cells carrying `original_id`.
    pub fn count_of(&self, original_id: &str) -> usize {
        self.entries
            .iter()
            .filter(|e| e.original_id == original_id)
            .count()
    }

    /// Whether any cell carries `original_id`.
    pub fn contains(&self, original_id: &str) -> bool {
        self.first_index_of(original_id).is_some()
    }
}
