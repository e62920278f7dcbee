//! Pending update store: the notebook-scoped inbox of unapplied updates.
//!
//! Backed by the metadata side-table so the inbox survives close/reopen.
//! All mutations go through this store so every change emits a
//! `PendingUpdatesChanged` event for the panel UI.

use crate::events::{CollabEvent, EventBus};
use crate::identity::IdentityMapping;
use crate::metadata::{self, CollabState};
use crate::notebook::{Notebook, Result};
use crate::wire::SenderType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// One unapplied update held for later review.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PendingUpdate {
    /// Dedup key: the target cell's original id (synthesized when the
    /// payload resolves no cell). A later arrival for the same cell replaces
    /// this one.
    pub id: String,
    /// The parsed update payload, kept verbatim for later application.
    pub message: serde_json::Value,
    /// Arrival time, milliseconds since the Unix epoch.
    pub time_received: u64,
    pub sender: String,
    pub sender_type: SenderType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_id: Option<String>,
    /// Resolved original cell id, when the payload carried one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cell_id: Option<String>,
}

/// Which senders' updates to show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterMode {
    All,
    TeacherOnly,
    AllTeammates,
    SelectedTeammates(BTreeSet<String>),
}

impl FilterMode {
    pub fn matches(&self, update: &PendingUpdate) -> bool {
        match self {
            FilterMode::All => true,
            FilterMode::TeacherOnly => update.sender_type == SenderType::Teacher,
            FilterMode::AllTeammates => update.sender_type == SenderType::Teammate,
            FilterMode::SelectedTeammates(allowed) => {
                update.sender_type == SenderType::Teammate && allowed.contains(&update.sender)
            }
        }
    }
}

/// Display order of the pending list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    /// Newest first.
    TimeDesc,
    /// Document order of the target cell; updates whose cell is not in the
    /// document sort last, preserving relative arrival order.
    CellAsc,
}

/// Sort a pending list in place. `CellAsc` consults the identity mapping's
/// last occurrence, so after duplication the update sorts with the cell it
/// will actually land on.
pub fn sort_pending(updates: &mut [PendingUpdate], key: SortKey, mapping: &IdentityMapping) {
    match key {
        SortKey::TimeDesc => {
            updates.sort_by(|a, b| b.time_received.cmp(&a.time_received));
        }
        SortKey::CellAsc => {
            updates.sort_by_key(|u| {
                u.cell_id
                    .as_deref()
                    .and_then(|id| mapping.last_index_of(id))
                    .unwrap_or(usize::MAX)
            });
        }
    }
}

/// Notebook-scoped store of pending updates and the updated-cells set.
pub struct PendingUpdateStore<N: Notebook> {
    notebook: Arc<N>,
    bus: Arc<EventBus>,
}

impl<N: Notebook> PendingUpdateStore<N> {
    pub fn new(notebook: Arc<N>, bus: Arc<EventBus>) -> Self {
        Self { notebook, bus }
    }

    /// Current pending list, arrival order.
    pub async fn list(&self) -> Result<Vec<PendingUpdate>> {
        Ok(metadata::read_state(&*self.notebook).await?.pending)
    }

    /// Pending list restricted to `filter`, ordered by `sort`.
    pub async fn list_filtered(
        &self,
        filter: &FilterMode,
        sort: SortKey,
        mapping: &IdentityMapping,
    ) -> Result<Vec<PendingUpdate>> {
        let mut updates: Vec<_> = self
            .list()
            .await?
            .into_iter()
            .filter(|u| filter.matches(u))
            .collect();
        sort_pending(&mut updates, sort, mapping);
        Ok(updates)
    }

    /// Insert an update, replacing any existing entry with the same id.
    ///
    /// Replacement keeps the original list position so a revised update does
    /// not jump around in the panel.
    pub async fn upsert(&self, update: PendingUpdate) -> Result<()> {
        let mut state = metadata::read_state(&*self.notebook).await?;
        match state.pending.iter_mut().find(|u| u.id == update.id) {
            Some(existing) => {
                debug!(id = %update.id, "Replacing pending update");
                *existing = update;
            }
            None => state.pending.push(update),
        }
        self.save_and_notify(state).await
    }

    /// Remove and return the update with `id`, if present.
    pub async fn remove(&self, id: &str) -> Result<Option<PendingUpdate>> {
        let mut state = metadata::read_state(&*self.notebook).await?;
        let Some(pos) = state.pending.iter().position(|u| u.id == id) else {
            return Ok(None);
        };
        let removed = state.pending.remove(pos);
        self.save_and_notify(state).await?;
        Ok(Some(removed))
    }

    /// Remove every update whose id is in `ids`. Returns the removed entries
    /// in their stored order.
    pub async fn remove_many(&self, ids: &BTreeSet<String>) -> Result<Vec<PendingUpdate>> {
        let mut state = metadata::read_state(&*self.notebook).await?;
        let (removed, kept): (Vec<_>, Vec<_>) = state
            .pending
            .drain(..)
            .partition(|u| ids.contains(&u.id));
        state.pending = kept;
        if removed.is_empty() {
            return Ok(removed);
        }
        self.save_and_notify(state).await?;
        Ok(removed)
    }

    /// Whether `original_id` has already received an applied update.
    pub async fn is_updated(&self, original_id: &str) -> Result<bool> {
        Ok(metadata::read_state(&*self.notebook)
            .await?
            .updated_cells
            .contains(original_id))
    }

    /// Record that `original_id` received its first applied update.
    pub async fn mark_updated(&self, original_id: &str) -> Result<()> {
        let mut state = metadata::read_state(&*self.notebook).await?;
        if state.updated_cells.insert(original_id.to_string()) {
            metadata::write_state(&*self.notebook, &state).await?;
        }
        Ok(())
    }

    /// Forget `original_id` so its next update is treated as a first update
    /// again (called when the duplicated copy has been deleted).
    pub async fn forget_updated(&self, original_id: &str) -> Result<()> {
        let mut state = metadata::read_state(&*self.notebook).await?;
        if state.updated_cells.remove(original_id) {
            metadata::write_state(&*self.notebook, &state).await?;
        }
        Ok(())
    }

    async fn save_and_notify(&self, state: CollabState) -> Result<()> {
        let count = state.pending.len();
        metadata::write_state(&*self.notebook, &state).await?;
        self.bus.emit(CollabEvent::PendingUpdatesChanged { count });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notebook::{Cell, InMemoryNotebook};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn update(id: &str, sender: &str, sender_type: SenderType, time: u64) -> PendingUpdate {
        PendingUpdate {
            id: id.to_string(),
            message: json!({"action": "update_cell", "content": {"id": id}}),
            time_received: time,
            sender: sender.to_string(),
            sender_type,
            update_id: Some(id.to_string()),
            cell_id: Some(id.to_string()),
        }
    }

    fn store() -> (PendingUpdateStore<InMemoryNotebook>, Arc<EventBus>) {
        let notebook = Arc::new(InMemoryNotebook::new("nb1"));
        let bus = Arc::new(EventBus::new());
        (PendingUpdateStore::new(notebook, Arc::clone(&bus)), bus)
    }

    #[tokio::test]
    async fn test_upsert_replaces_by_id_in_place() {
        let (store, _bus) = store();

        store
            .upsert(update("u1", "alice", SenderType::Teammate, 100))
            .await
            .unwrap();
        store
            .upsert(update("u2", "bob", SenderType::Teammate, 200))
            .await
            .unwrap();

        let mut revised = update("u1", "alice", SenderType::Teammate, 300);
        revised.message = json!({"action": "update_cell", "content": {"id": "u1", "source": "v2"}});
        store.upsert(revised.clone()).await.unwrap();

        let list = store.list().await.unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0], revised);
        assert_eq!(list[1].id, "u2");
    }

    #[tokio::test]
    async fn test_remove() {
        let (store, _bus) = store();
        store
            .upsert(update("u1", "alice", SenderType::Teammate, 100))
            .await
            .unwrap();

        let removed = store.remove("u1").await.unwrap();
        assert_eq!(removed.unwrap().id, "u1");
        assert!(store.list().await.unwrap().is_empty());

        assert!(store.remove("u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove_many() {
        let (store, _bus) = store();
        for (id, time) in [("u1", 1), ("u2", 2), ("u3", 3)] {
            store
                .upsert(update(id, "alice", SenderType::Teammate, time))
                .await
                .unwrap();
        }

        let ids: BTreeSet<_> = ["u1".to_string(), "u3".to_string()].into();
        let removed = store.remove_many(&ids).await.unwrap();
        assert_eq!(removed.len(), 2);

        let remaining = store.list().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, "u2");
    }

    #[tokio::test]
    async fn test_mutations_emit_events() {
        let (store, bus) = store();
        let emitted = Arc::new(AtomicUsize::new(0));
        let emitted_clone = Arc::clone(&emitted);
        let _sub = bus.subscribe(move |event| {
            if matches!(event, CollabEvent::PendingUpdatesChanged { .. }) {
                emitted_clone.fetch_add(1, Ordering::Relaxed);
            }
        });

        store
            .upsert(update("u1", "alice", SenderType::Teammate, 100))
            .await
            .unwrap();
        store.remove("u1").await.unwrap();

        assert_eq!(emitted.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_filter_modes() {
        let teacher = update("u1", "teacher-1", SenderType::Teacher, 1);
        let alice = update("u2", "alice", SenderType::Teammate, 2);
        let bob = update("u3", "bob", SenderType::Teammate, 3);

        assert!(FilterMode::All.matches(&teacher));
        assert!(FilterMode::All.matches(&alice));

        assert!(FilterMode::TeacherOnly.matches(&teacher));
        assert!(!FilterMode::TeacherOnly.matches(&alice));

        assert!(!FilterMode::AllTeammates.matches(&teacher));
        assert!(FilterMode::AllTeammates.matches(&alice));

        let selected = FilterMode::SelectedTeammates(["alice".to_string()].into());
        assert!(selected.matches(&alice));
        assert!(!selected.matches(&bob));
        assert!(!selected.matches(&teacher));
    }

    #[tokio::test]
    async fn test_sort_time_desc() {
        let mut updates = vec![
            update("u1", "a", SenderType::Teammate, 100),
            update("u2", "a", SenderType::Teammate, 300),
            update("u3", "a", SenderType::Teammate, 200),
        ];
        sort_pending(&mut updates, SortKey::TimeDesc, &IdentityMapping::default());
        let ids: Vec<_> = updates.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, ["u2", "u3", "u1"]);
    }

    #[tokio::test]
    async fn test_sort_cell_asc_unmapped_last() {
        let cells = vec![
            Cell::code("c1", "").with_original_id("o1"),
            Cell::code("c2", "").with_original_id("o2"),
        ];
        let mapping = IdentityMapping::compute(&cells);

        let mut u_o2 = update("a", "x", SenderType::Teammate, 1);
        u_o2.cell_id = Some("o2".into());
        let mut u_o1 = update("b", "x", SenderType::Teammate, 2);
        u_o1.cell_id = Some("o1".into());
        let mut u_gone = update("c", "x", SenderType::Teammate, 3);
        u_gone.cell_id = Some("deleted".into());
        let mut u_none = update("d", "x", SenderType::Teammate, 4);
        u_none.cell_id = None;

        let mut updates = vec![u_gone, u_o2, u_none, u_o1];
        sort_pending(&mut updates, SortKey::CellAsc, &mapping);

        let ids: Vec<_> = updates.iter().map(|u| u.id.as_str()).collect();
        // Mapped updates in document order, unmapped after in arrival order
        assert_eq!(ids, ["b", "a", "c", "d"]);
    }

    #[tokio::test]
    async fn test_updated_cells_set() {
        let (store, _bus) = store();

        assert!(!store.is_updated("o1").await.unwrap());
        store.mark_updated("o1").await.unwrap();
        assert!(store.is_updated("o1").await.unwrap());

        store.forget_updated("o1").await.unwrap();
        assert!(!store.is_updated("o1").await.unwrap());
    }

    #[tokio::test]
    async fn test_state_survives_via_metadata() {
        let notebook = Arc::new(InMemoryNotebook::new("nb1"));
        let bus = Arc::new(EventBus::new());
        let store = PendingUpdateStore::new(Arc::clone(&notebook), Arc::clone(&bus));
        store
            .upsert(update("u1", "alice", SenderType::Teammate, 100))
            .await
            .unwrap();
        drop(store);

        // A fresh store over the same notebook sees the persisted inbox
        let reopened = PendingUpdateStore::new(notebook, bus);
        assert_eq!(reopened.list().await.unwrap().len(), 1);
    }
}
