//! Event infrastructure for collab-core.
//!
//! Provides `CollabEvent` for UI re-render signals and `EventBus` for
//! subscriptions. Thread-safe for the multi-threaded Tokio runtime; wrap the
//! bus in `Arc` to enable subscriptions.

use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

/// State-change notifications emitted by the engine.
///
/// Consumers (panel UI, outline view, daemon) re-read the relevant state on
/// receipt; events carry identifiers, not full snapshots.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CollabEvent {
    /// The pending update list changed (upsert, removal, or batch apply).
    PendingUpdatesChanged {
        /// Number of updates now pending.
        count: usize,
    },
    /// An update was applied into the document.
    UpdateApplied {
        /// Original id of the cell the update landed on.
        #[serde(rename = "cellId")]
        cell_id: String,
    },
    /// The set of connected peers changed.
    PeerSetChanged {
        /// Number of peers now connected.
        count: usize,
    },
    /// A peer reported a new cell location.
    LocationUpdated {
        #[serde(rename = "userId")]
        user_id: String,
        #[serde(rename = "cellId")]
        cell_id: String,
    },
    /// A peer cleared its location.
    LocationCleared {
        #[serde(rename = "userId")]
        user_id: String,
    },
}

/// Subscription handle that unsubscribes automatically when dropped.
///
/// Follows the disposer pattern: hold this value to keep receiving events,
/// drop it (or let it go out of scope) to unsubscribe.
pub struct Subscription {
    bus: Weak<EventBus>,
    id: usize,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

/// Event bus for publishing engine events to subscribers.
pub struct EventBus {
    callbacks: RwLock<Vec<(usize, Arc<dyn Fn(CollabEvent) + Send + Sync>)>>,
    next_id: AtomicUsize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self {
            callbacks: RwLock::new(Vec::new()),
            next_id: AtomicUsize::new(0),
        }
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events. Returns `Subscription` that unsubscribes on drop.
    ///
    /// Requires `self` to be wrapped in `Arc`.
    pub fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn(CollabEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(callback)));
        Subscription {
            bus: Arc::downgrade(self),
            id,
        }
    }

    fn unsubscribe(&self, id: usize) {
        // Use try_write to avoid deadlock if Drop runs during panic unwinding
        // while a read lock is held (e.g., during emit).
        if let Ok(mut guard) = self.callbacks.try_write() {
            guard.retain(|(i, _)| *i != id);
        }
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: CollabEvent) {
        // Clone the callback list to prevent deadlock if a callback calls subscribe.
        let callbacks: Vec<_> = self
            .callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in callbacks {
            callback(event.clone());
        }
    }
}
