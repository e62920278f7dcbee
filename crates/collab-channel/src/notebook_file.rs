//! File-backed notebook adapter for headless operation.
//!
//! Loads a JSON notebook document into an `InMemoryNotebook` and writes it
//! back on demand. The engine's metadata side-table is stored in the
//! document's `metadata` map, so pending updates survive a daemon restart
//! the same way they survive an editor reopen.

use collab_core::notebook::{Cell, InMemoryNotebook, Notebook};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum FileError {
    #[error("Notebook file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Notebook file is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Notebook is disposed")]
    Disposed,
}

pub type Result<T> = std::result::Result<T, FileError>;

/// On-disk document shape.
#[derive(Serialize, Deserialize)]
struct NotebookDoc {
    #[serde(rename = "notebookId")]
    notebook_id: String,
    cells: Vec<Cell>,
    #[serde(default)]
    metadata: HashMap<String, serde_json::Value>,
}

/// A notebook document loaded from a JSON file.
pub struct NotebookFile {
    path: PathBuf,
    notebook: Arc<InMemoryNotebook>,
}

impl NotebookFile {
    /// Load a notebook from `path`.
    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path).await?;
        let doc: NotebookDoc = serde_json::from_str(&raw)?;
        debug!(
            notebook_id = %doc.notebook_id,
            cells = doc.cells.len(),
            "Loaded notebook file"
        );

        let notebook = Arc::new(InMemoryNotebook::with_cells(&doc.notebook_id, doc.cells));
        notebook.set_metadata_map(doc.metadata);
        Ok(Self {
            path: path.to_path_buf(),
            notebook,
        })
    }

    /// The live document handle shared with the session.
    pub fn notebook(&self) -> Arc<InMemoryNotebook> {
        Arc::clone(&self.notebook)
    }

    /// Write the current document state back to the file.
    pub async fn save(&self) -> Result<()> {
        let cells = self.notebook.cells().await.map_err(|_| FileError::Disposed)?;
        let doc = NotebookDoc {
            notebook_id: self.notebook.notebook_id().to_string(),
            cells,
            metadata: self.notebook.metadata_map(),
        };
        let raw = serde_json::to_string_pretty(&doc)?;
        tokio::fs::write(&self.path, raw).await?;
        debug!(path = %self.path.display(), "Saved notebook file");
        Ok(())
    }
}
