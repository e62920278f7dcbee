//! collab-core: Reconciliation engine for collaborative notebook editing.
//!
//! This crate provides the core functionality for:
//! - Correlating cells across peers via stable original-id annotations
//! - Queueing and merging server-pushed cell updates
//! - Tracking peer presence and per-cell locations
//! - Notebook and backend-api trait abstractions

pub mod api;
pub mod events;
pub mod identity;
pub mod metadata;
pub mod notebook;
pub mod pending;
pub mod presence;
pub mod reconciler;
pub mod session;
pub mod wire;

pub use api::{CollabApi, InteractionKind, InteractionRecord, PeerLocation, RecordingApi};
pub use events::{CollabEvent, EventBus, Subscription};
pub use identity::IdentityMapping;
pub use notebook::{Cell, CellType, InMemoryNotebook, Notebook, NotebookError};
pub use pending::{FilterMode, PendingUpdate, PendingUpdateStore, SortKey};
pub use presence::{OutlineEntry, PresenceTracker};
pub use reconciler::{ReconcileError, Reconciler};
pub use session::{CollabSession, UpdateDecision};
pub use wire::{ChannelEvent, MessagePayload, SenderType, UpdatePayload};
