//! Notebook trait abstraction for host-editor document access.
//!
//! Implementations:
//! - `InMemoryNotebook` - For testing and the headless daemon
//! - Host-editor adapters live outside this crate (the editor extension
//!   bridges its widget API to this trait)

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotebookError {
    #[error("Notebook is disposed")]
    Disposed,

    #[error("Cell index out of bounds: {0}")]
    OutOfBounds(usize),

    #[error("Metadata error: {0}")]
    Metadata(String),
}

pub type Result<T> = std::result::Result<T, NotebookError>;

/// Kind of a notebook cell. Determines comment syntax for marker lines.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CellType {
    Code,
    Markdown,
}

/// A single notebook cell as seen through the host abstraction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cell {
    /// The host editor's current id for this cell
    pub id: String,
    #[serde(rename = "cell_type")]
    pub cell_type: CellType,
    pub source: String,
    /// Stable original-id annotation. Assigned once at creation on the
    /// authoring side and propagated on copy; never reassigned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_id: Option<String>,
}

impl Cell {
    pub fn code(id: &str, source: &str) -> Self {
        Self {
            id: id.to_string(),
            cell_type: CellType::Code,
            source: source.to_string(),
            original_id: None,
        }
    }

    pub fn markdown(id: &str, source: &str) -> Self {
        Self {
            id: id.to_string(),
            cell_type: CellType::Markdown,
            source: source.to_string(),
            original_id: None,
        }
    }

    pub fn with_original_id(mut self, original_id: &str) -> Self {
        self.original_id = Some(original_id.to_string());
        self
    }

    /// The stable identity used for cross-peer correlation.
    ///
    /// A missing or empty annotation degrades to the cell's own current id
    /// (non-fatal, per the malformed-annotation contract).
    pub fn origin(&self) -> &str {
        match self.original_id.as_deref() {
            Some(o) if !o.is_empty() => o,
            _ => &self.id,
        }
    }
}

/// Host document abstraction.
///
/// All mutating operations must check document liveness first and return
/// `NotebookError::Disposed` rather than panic; readers degrade to empty.
#[async_trait]
pub trait Notebook: Send + Sync {
    /// Stable identifier of the open document (used to key channel
    /// connections and REST queries).
    fn notebook_id(&self) -> &str;

    /// Whether the document is still open and mutable.
    async fn is_alive(&self) -> bool;

    /// Snapshot of the ordered cell list.
    async fn cells(&self) -> Result<Vec<Cell>>;

    /// Overwrite the content of the cell at `index`.
    async fn set_source(&self, index: usize, source: &str) -> Result<()>;

    /// Insert a new cell immediately above `index`.
    async fn insert_cell_above(&self, index: usize, cell: Cell) -> Result<()>;

    /// Append a new cell at the end of the document.
    async fn append_cell(&self, cell: Cell) -> Result<()>;

    /// Delete the cell at `index`.
    async fn delete_cell(&self, index: usize) -> Result<()>;

    /// Move editing focus to the cell at `index`.
    async fn focus_cell(&self, index: usize) -> Result<()>;

    /// Scroll the viewport so the cell at `index` is visible.
    async fn scroll_to_cell(&self, index: usize) -> Result<()>;

    /// Read a document metadata value. None if absent or disposed.
    async fn read_metadata(&self, key: &str) -> Option<serde_json::Value>;

    /// Write a document metadata value.
    async fn write_metadata(&self, key: &str, value: serde_json::Value) -> Result<()>;
}

// Implement Notebook for Arc<T> where T: Notebook
// This allows the session, store and reconciler to share one document handle
#[async_trait]
impl<T: Notebook + Send + Sync> Notebook for std::sync::Arc<T> {
    fn notebook_id(&self) -> &str {
        (**self).notebook_id()
    }

    async fn is_alive(&self) -> bool {
        (**self).is_alive().await
    }

    async fn cells(&self) -> Result<Vec<Cell>> {
        (**self).cells().await
    }

    async fn set_source(&self, index: usize, source: &str) -> Result<()> {
        (**self).set_source(index, source).await
    }

    async fn insert_cell_above(&self, index: usize, cell: Cell) -> Result<()> {
        (**self).insert_cell_above(index, cell).await
    }

    async fn append_cell(&self, cell: Cell) -> Result<()> {
        (**self).append_cell(cell).await
    }

    async fn delete_cell(&self, index: usize) -> Result<()> {
        (**self).delete_cell(index).await
    }

    async fn focus_cell(&self, index: usize) -> Result<()> {
        (**self).focus_cell(index).await
    }

    async fn scroll_to_cell(&self, index: usize) -> Result<()> {
        (**self).scroll_to_cell(index).await
    }

    async fn read_metadata(&self, key: &str) -> Option<serde_json::Value> {
        (**self).read_metadata(key).await
    }

    async fn write_metadata(&self, key: &str, value: serde_json::Value) -> Result<()> {
        (**self).write_metadata(key, value).await
    }
}

struct NotebookState {
    cells: Vec<Cell>,
    metadata: HashMap<String, serde_json::Value>,
    focused: Option<usize>,
    scrolled_to: Option<usize>,
    alive: bool,
}

/// In-memory notebook for testing and headless operation.
pub struct InMemoryNotebook {
    id: String,
    state: RwLock<NotebookState>,
}

impl InMemoryNotebook {
    pub fn new(id: &str) -> Self {
        Self::with_cells(id, Vec::new())
    }

    pub fn with_cells(id: &str, cells: Vec<Cell>) -> Self {
        Self {
            id: id.to_string(),
            state: RwLock::new(NotebookState {
                cells,
                metadata: HashMap::new(),
                focused: None,
                scrolled_to: None,
                alive: true,
            }),
        }
    }

    /// Mark the document as closed; subsequent mutations fail with Disposed.
    pub fn dispose(&self) {
        self.state.write().unwrap_or_else(|e| e.into_inner()).alive = false;
    }

    /// Currently focused cell index (for test assertions).
    pub fn focused(&self) -> Option<usize> {
        self.state.read().unwrap_or_else(|e| e.into_inner()).focused
    }

    /// Last scrolled-to cell index (for test assertions).
    pub fn scrolled_to(&self) -> Option<usize> {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .scrolled_to
    }

    /// Replace the whole metadata map (used by the notebook-file adapter).
    pub fn set_metadata_map(&self, metadata: HashMap<String, serde_json::Value>) {
        self.state
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .metadata = metadata;
    }

    /// Snapshot of the metadata map (used by the notebook-file adapter).
    pub fn metadata_map(&self) -> HashMap<String, serde_json::Value> {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .metadata
            .clone()
    }
}

#[async_trait]
impl Notebook for InMemoryNotebook {
    fn notebook_id(&self) -> &str {
        &self.id
    }

    async fn is_alive(&self) -> bool {
        self.state.read().unwrap_or_else(|e| e.into_inner()).alive
    }

    async fn cells(&self) -> Result<Vec<Cell>> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        if !state.alive {
            return Err(NotebookError::Disposed);
        }
        Ok(state.cells.clone())
    }

    async fn set_source(&self, index: usize, source: &str) -> Result<()> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if !state.alive {
            return Err(NotebookError::Disposed);
        }
        let cell = state
            .cells
            .get_mut(index)
            .ok_or(NotebookError::OutOfBounds(index))?;
        cell.source = source.to_string();
        Ok(())
    }

    async fn insert_cell_above(&self, index: usize, cell: Cell) -> Result<()> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if !state.alive {
            return Err(NotebookError::Disposed);
        }
        if index > state.cells.len() {
            return Err(NotebookError::OutOfBounds(index));
        }
        state.cells.insert(index, cell);
        Ok(())
    }

    async fn append_cell(&self, cell: Cell) -> Result<()> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if !state.alive {
            return Err(NotebookError::Disposed);
        }
        state.cells.push(cell);
        Ok(())
    }

    async fn delete_cell(&self, index: usize) -> Result<()> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if !state.alive {
            return Err(NotebookError::Disposed);
        }
        if index >= state.cells.len() {
            return Err(NotebookError::OutOfBounds(index));
        }
        state.cells.remove(index);
        Ok(())
    }

    async fn focus_cell(&self, index: usize) -> Result<()> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if !state.alive {
            return Err(NotebookError::Disposed);
        }
        if index >= state.cells.len() {
            return Err(NotebookError::OutOfBounds(index));
        }
        state.focused = Some(index);
        Ok(())
    }

    async fn scroll_to_cell(&self, index: usize) -> Result<()> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if !state.alive {
            return Err(NotebookError::Disposed);
        }
        if index >= state.cells.len() {
            return Err(NotebookError::OutOfBounds(index));
        }
        state.scrolled_to = Some(index);
        Ok(())
    }

    async fn read_metadata(&self, key: &str) -> Option<serde_json::Value> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        if !state.alive {
            return None;
        }
        state.metadata.get(key).cloned()
    }

    async fn write_metadata(&self, key: &str, value: serde_json::Value) -> Result<()> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if !state.alive {
            return Err(NotebookError::Disposed);
        }
        state.metadata.insert(key.to_string(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_basic_cell_operations() {
        let nb = InMemoryNotebook::with_cells(
            "nb-1",
            vec![Cell::code("c1", "print(1)"), Cell::code("c2", "print(2)")],
        );

        nb.set_source(0, "print(42)").await.unwrap();
        let cells = nb.cells().await.unwrap();
        assert_eq!(cells[0].source, "print(42)");

        nb.insert_cell_above(1, Cell::markdown("c3", "# heading"))
            .await
            .unwrap();
        let cells = nb.cells().await.unwrap();
        assert_eq!(cells.len(), 3);
        assert_eq!(cells[1].id, "c3");

        nb.delete_cell(1).await.unwrap();
        assert_eq!(nb.cells().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_append_and_focus() {
        let nb = InMemoryNotebook::with_cells("nb-1", vec![Cell::code("c1", "")]);

        nb.append_cell(Cell::code("c2", "x = 1")).await.unwrap();
        nb.focus_cell(1).await.unwrap();

        assert_eq!(nb.focused(), Some(1));
        assert_eq!(nb.cells().await.unwrap()[1].id, "c2");
    }

    #[tokio::test]
    async fn test_disposed_notebook_rejects_mutation() {
        let nb = InMemoryNotebook::with_cells("nb-1", vec![Cell::code("c1", "")]);
        nb.dispose();

        assert!(!nb.is_alive().await);
        assert!(matches!(
            nb.set_source(0, "x").await,
            Err(NotebookError::Disposed)
        ));
        assert!(matches!(nb.cells().await, Err(NotebookError::Disposed)));
        assert!(nb.read_metadata("anything").await.is_none());
    }

    #[tokio::test]
    async fn test_out_of_bounds() {
        let nb = InMemoryNotebook::with_cells("nb-1", vec![Cell::code("c1", "")]);

        assert!(matches!(
            nb.set_source(5, "x").await,
            Err(NotebookError::OutOfBounds(5))
        ));
        assert!(matches!(
            nb.delete_cell(1).await,
            Err(NotebookError::OutOfBounds(1))
        ));
    }

    #[tokio::test]
    async fn test_metadata_roundtrip() {
        let nb = InMemoryNotebook::new("nb-1");

        assert!(nb.read_metadata("k").await.is_none());
        nb.write_metadata("k", serde_json::json!({"a": 1}))
            .await
            .unwrap();
        assert_eq!(
            nb.read_metadata("k").await.unwrap(),
            serde_json::json!({"a": 1})
        );
    }

    #[test]
    fn test_origin_fallback() {
        let plain = Cell::code("c1", "");
        assert_eq!(plain.origin(), "c1");

        let annotated = Cell::code("c1", "").with_original_id("o1");
        assert_eq!(annotated.origin(), "o1");

        let empty = Cell {
            original_id: Some(String::new()),
            ..Cell::code("c1", "")
        };
        assert_eq!(empty.origin(), "c1");
    }
}
