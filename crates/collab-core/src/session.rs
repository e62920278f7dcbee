//! Per-document collaboration session.
//!
//! One `CollabSession` owns all reconciliation state for one open document:
//! the pending update store, the reconciler, and the presence tracker. UI
//! collaborators and the daemon reach state through the session instead of
//! any process-wide registry; closing the document drops the session and
//! everything transient with it.

use crate::api::{CollabApi, InteractionKind, InteractionRecord};
use crate::events::{CollabEvent, EventBus};
use crate::identity::IdentityMapping;
use crate::notebook::Notebook;
use crate::pending::{FilterMode, PendingUpdate, PendingUpdateStore, SortKey};
use crate::presence::{self, OutlineEntry, PresenceTracker};
use crate::reconciler::{Reconciler, Result};
use crate::wire::{ChannelEvent, MessageScope, UpdatePayload};
use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// What the user chose to do with an incoming update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateDecision {
    /// Apply immediately.
    UpdateNow,
    /// Park in the pending store for later review.
    UpdateLater,
    /// Discard without applying or storing.
    Dismiss,
}

fn now_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

pub type MessageCallback = Box<dyn Fn(&PendingUpdate) + Send + Sync>;
pub type PeerSetCallback = Box<dyn Fn(usize) + Send + Sync>;
pub type LocationCallback = Box<dyn Fn(&crate::api::PeerLocation) + Send + Sync>;
pub type UserCallback = Box<dyn Fn(&str) + Send + Sync>;

/// UI callback slots. Each is a single slot, last writer wins; setting
/// `None` unsets. These carry typed payloads for the bound widget, while the
/// event bus carries the broader re-render signals.
#[derive(Default)]
struct Callbacks {
    on_message: Option<MessageCallback>,
    on_peer_set_changed: Option<PeerSetCallback>,
    on_location_update: Option<LocationCallback>,
    on_location_cleared: Option<UserCallback>,
}

/// Session facade over the engine for one open document.
pub struct CollabSession<N: Notebook> {
    notebook: Arc<N>,
    store: Arc<PendingUpdateStore<N>>,
    reconciler: Reconciler<N>,
    presence: Arc<PresenceTracker>,
    api: Arc<dyn CollabApi>,
    bus: Arc<EventBus>,
    callbacks: RwLock<Callbacks>,
}

impl<N: Notebook> CollabSession<N> {
    pub fn new(notebook: Arc<N>, api: Arc<dyn CollabApi>) -> Self {
        let bus = Arc::new(EventBus::new());
        let store = Arc::new(PendingUpdateStore::new(
            Arc::clone(&notebook),
            Arc::clone(&bus),
        ));
        let reconciler = Reconciler::new(
            Arc::clone(&notebook),
            Arc::clone(&store),
            Arc::clone(&bus),
        );
        Self {
            notebook,
            store,
            reconciler,
            presence: Arc::new(PresenceTracker::new()),
            api,
            bus,
            callbacks: RwLock::new(Callbacks::default()),
        }
    }

    /// Replace the message callback slot. `None` unsets it.
    pub fn set_on_message(&self, callback: Option<MessageCallback>) {
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .on_message = callback;
    }

    /// Replace the peer-set-changed callback slot. `None` unsets it.
    pub fn set_on_peer_set_changed(&self, callback: Option<PeerSetCallback>) {
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .on_peer_set_changed = callback;
    }

    /// Replace the location-update callback slot. `None` unsets it.
    pub fn set_on_location_update(&self, callback: Option<LocationCallback>) {
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .on_location_update = callback;
    }

    /// Replace the location-cleared callback slot. `None` unsets it.
    pub fn set_on_location_cleared(&self, callback: Option<UserCallback>) {
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .on_location_cleared = callback;
    }

    pub fn notebook_id(&self) -> &str {
        self.notebook.notebook_id()
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn presence(&self) -> &Arc<PresenceTracker> {
        &self.presence
    }

    /// Route one decoded channel event.
    ///
    /// Presence events are absorbed into the tracker. Message events whose
    /// body parses as an update payload are returned so the driver can ask
    /// the user for a decision; anything else is logged and dropped.
    pub fn handle_event(&self, event: ChannelEvent) -> Option<PendingUpdate> {
        match event {
            ChannelEvent::DirectMessage { payload, .. } => {
                let update = self.ingest_message(payload.normalize(MessageScope::Direct))?;
                self.notify_message(&update);
                Some(update)
            }
            ChannelEvent::GroupMessage { payload, .. } => {
                let update = self.ingest_message(payload.normalize(MessageScope::Group))?;
                self.notify_message(&update);
                Some(update)
            }
            ChannelEvent::PeerJoined { user_id } => {
                if self.presence.peer_joined(&user_id) {
                    info!(user_id, "Peer joined");
                }
                self.notify_peer_set_changed();
                None
            }
            ChannelEvent::PeerLeft { user_id } => {
                if self.presence.peer_left(&user_id) {
                    info!(user_id, "Peer left");
                }
                self.notify_peer_set_changed();
                None
            }
            ChannelEvent::LocationUpdate {
                user_id,
                cell_id,
                cell_index,
            } => {
                let Some(user_id) = user_id else {
                    warn!("Location update without a sender, dropping");
                    return None;
                };
                let location = crate::api::PeerLocation {
                    user_id: user_id.clone(),
                    cell_id: cell_id.clone(),
                    cell_index,
                };
                self.presence.set_location(location.clone());
                if let Some(cb) = &self
                    .callbacks
                    .read()
                    .unwrap_or_else(|e| e.into_inner())
                    .on_location_update
                {
                    cb(&location);
                }
                self.bus
                    .emit(CollabEvent::LocationUpdated { user_id, cell_id });
                None
            }
            ChannelEvent::LocationCleared { user_id } => {
                self.presence.clear_location(&user_id);
                if let Some(cb) = &self
                    .callbacks
                    .read()
                    .unwrap_or_else(|e| e.into_inner())
                    .on_location_cleared
                {
                    cb(&user_id);
                }
                self.bus.emit(CollabEvent::LocationCleared { user_id });
                None
            }
        }
    }

    fn notify_message(&self, update: &PendingUpdate) {
        if let Some(cb) = &self
            .callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .on_message
        {
            cb(update);
        }
    }

    fn notify_peer_set_changed(&self) {
        let count = self.presence.peer_count();
        if let Some(cb) = &self
            .callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .on_peer_set_changed
        {
            cb(count);
        }
        self.bus.emit(CollabEvent::PeerSetChanged { count });
    }

    fn ingest_message(&self, message: crate::wire::NormalizedMessage) -> Option<PendingUpdate> {
        let payload = match UpdatePayload::from_message(&message.message) {
            Ok(payload) => payload,
            Err(e) => {
                debug!(sender = %message.sender, "Message is not an update payload: {e}");
                return None;
            }
        };
        let cell_id = payload.resolve_cell_id();
        // Keyed by the target cell, so a fresher push to the same cell
        // replaces any older queued one; the update id stays a separate
        // correlation field
        let id = cell_id.clone().unwrap_or_else(crate::wire::fallback_cell_id);
        let message_value = serde_json::to_value(&payload).ok()?;
        Some(PendingUpdate {
            id,
            message: message_value,
            time_received: now_ms(),
            sender: message.sender,
            sender_type: message.sender_type,
            update_id: payload.update_id,
            cell_id,
        })
    }

    /// Carry out the user's decision for a freshly received update.
    pub async fn resolve(&self, update: PendingUpdate, decision: UpdateDecision) -> Result<()> {
        match decision {
            UpdateDecision::UpdateNow => {
                self.reconciler.apply(&update).await?;
                // A live apply supersedes any older deferred entry for the
                // same cell
                self.store.remove(&update.id).await?;
                self.log(InteractionKind::UpdateNow, Some(&update)).await;
            }
            UpdateDecision::UpdateLater => {
                self.store.upsert(update.clone()).await?;
                self.log(InteractionKind::UpdateLater, Some(&update)).await;
            }
            UpdateDecision::Dismiss => {
                debug!(id = %update.id, "Update dismissed");
            }
        }
        Ok(())
    }

    /// Pending updates restricted to `filter`, ordered by `sort`.
    pub async fn list_pending(
        &self,
        filter: &FilterMode,
        sort: SortKey,
    ) -> Result<Vec<PendingUpdate>> {
        let mapping = self.mapping().await?;
        Ok(self.store.list_filtered(filter, sort, &mapping).await?)
    }

    /// Apply one stored update, then remove it from the store.
    pub async fn apply_update(&self, id: &str) -> Result<bool> {
        let Some(update) = self
            .store
            .list()
            .await?
            .into_iter()
            .find(|u| u.id == id)
        else {
            return Ok(false);
        };
        // Removal only after a successful apply, so a failed apply leaves
        // the update available for retry
        self.reconciler.apply(&update).await?;
        self.store.remove(id).await?;
        self.log(InteractionKind::ApplySingle, Some(&update)).await;
        Ok(true)
    }

    /// Remove one stored update without applying it.
    pub async fn remove_update(&self, id: &str) -> Result<bool> {
        let Some(removed) = self.store.remove(id).await? else {
            return Ok(false);
        };
        self.log(InteractionKind::RemoveSingle, Some(&removed)).await;
        Ok(true)
    }

    /// Apply every pending update visible under `filter`.
    ///
    /// Per-item failures are reported and skipped; the failed updates stay
    /// in the store. Emits a single aggregate log entry, not one per item.
    pub async fn apply_all(&self, filter: &FilterMode) -> Result<usize> {
        let mapping = self.mapping().await?;
        let updates = self
            .store
            .list_filtered(filter, SortKey::CellAsc, &mapping)
            .await?;

        let mut applied = BTreeSet::new();
        for update in &updates {
            match self.reconciler.apply(update).await {
                Ok(()) => {
                    applied.insert(update.id.clone());
                }
                Err(e) => {
                    warn!(id = %update.id, "Skipping update in batch apply: {e}");
                }
            }
        }
        let count = applied.len();
        if !applied.is_empty() {
            self.store.remove_many(&applied).await?;
        }
        self.log(InteractionKind::UpdateAll, None).await;
        Ok(count)
    }

    /// Discard every pending update visible under `filter`.
    pub async fn delete_all(&self, filter: &FilterMode) -> Result<usize> {
        let ids: BTreeSet<String> = self
            .store
            .list()
            .await?
            .into_iter()
            .filter(|u| filter.matches(u))
            .map(|u| u.id)
            .collect();
        let removed = self.store.remove_many(&ids).await?;
        self.log(InteractionKind::DeleteAll, None).await;
        Ok(removed.len())
    }

    /// Notify the session of a structural document change so stale
    /// update-history entries are dropped.
    pub async fn document_changed(&self) -> Result<()> {
        self.reconciler.prune_updated_cells().await
    }

    /// Rebuild presence from the backend (reconnect or periodic backstop).
    pub async fn refresh_presence(&self) {
        self.presence
            .refresh(self.api.as_ref(), self.notebook.notebook_id())
            .await;
        self.bus.emit(CollabEvent::PeerSetChanged {
            count: self.presence.peer_count(),
        });
    }

    /// Document outline with presence indicators.
    pub async fn outline(&self) -> Result<Vec<OutlineEntry>> {
        let cells = self.notebook.cells().await?;
        Ok(presence::outline(&cells, &self.presence))
    }

    /// Jump the editor to an outline entry: scroll it into view and focus it.
    pub async fn navigate_to(&self, index: usize) -> Result<()> {
        self.notebook.scroll_to_cell(index).await?;
        self.notebook.focus_cell(index).await?;
        Ok(())
    }

    async fn mapping(&self) -> Result<IdentityMapping> {
        let cells = self.notebook.cells().await?;
        Ok(IdentityMapping::compute(&cells))
    }

    async fn log(&self, kind: InteractionKind, update: Option<&PendingUpdate>) {
        self.api
            .log_interaction(InteractionRecord {
                notebook_id: self.notebook.notebook_id().to_string(),
                cell_id: update.and_then(|u| u.cell_id.clone()),
                sender: update.map(|u| u.sender.clone()),
                sender_type: update.map(|u| u.sender_type),
                update_id: update.and_then(|u| u.update_id.clone()),
                kind,
                timestamp: now_ms(),
            })
            .await;
    }
}
