//! Presence tracking: which peers are attached to this document and which
//! cell each one is editing.
//!
//! All state here is transient and process-local. It is rebuilt from the
//! REST roster on (re)connect and incrementally updated by channel events;
//! nothing is persisted. Push events keep it fresh, the pull-based
//! `refresh` is the correctness backstop for missed events.

use crate::api::{CollabApi, PeerLocation};
use crate::identity::IdentityMapping;
use crate::notebook::{Cell, CellType};
use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;
use tracing::debug;

/// Maximum label length for code-cell outline entries.
const OUTLINE_PREVIEW_LEN: usize = 60;

/// Tracks the connected peer set and last reported location per peer.
///
/// Thread-safe; wrap in `Arc` for sharing with channel callbacks.
pub struct PresenceTracker {
    peers: RwLock<BTreeSet<String>>,
    locations: RwLock<HashMap<String, PeerLocation>>,
}

impl Default for PresenceTracker {
    fn default() -> Self {
        Self {
            peers: RwLock::new(BTreeSet::new()),
            locations: RwLock::new(HashMap::new()),
        }
    }
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a peer joining. Idempotent; returns true if the peer was new.
    pub fn peer_joined(&self, user_id: &str) -> bool {
        self.peers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(user_id.to_string())
    }

    /// Record a peer leaving, dropping its location. Idempotent; returns
    /// true if the peer was present.
    pub fn peer_left(&self, user_id: &str) -> bool {
        self.locations
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(user_id);
        self.peers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(user_id)
    }

    /// Overwrite a peer's reported location. A location from an unseen peer
    /// also registers the peer (events may arrive out of order).
    pub fn set_location(&self, location: PeerLocation) {
        self.peer_joined(&location.user_id);
        self.locations
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(location.user_id.clone(), location);
    }

    /// Clear a peer's location without removing the peer.
    pub fn clear_location(&self, user_id: &str) -> Option<PeerLocation> {
        self.locations
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(user_id)
    }

    /// Currently known peers, sorted.
    pub fn connected_peers(&self) -> Vec<String> {
        self.peers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Last reported location per peer.
    pub fn locations(&self) -> Vec<PeerLocation> {
        self.locations
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    pub fn location_of(&self, user_id: &str) -> Option<PeerLocation> {
        self.locations
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(user_id)
            .cloned()
    }

    /// Drop all transient state (channel teardown).
    pub fn clear(&self) {
        self.peers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.locations
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Rebuild the roster and locations from the backend.
    pub async fn refresh(&self, api: &dyn CollabApi, notebook_id: &str) {
        let peers = api.fetch_connected_peers(notebook_id).await;
        let locations = api.fetch_peer_locations(notebook_id).await;
        debug!(
            notebook_id,
            peers = peers.len(),
            locations = locations.len(),
            "Refreshed presence from backend"
        );

        *self.peers.write().unwrap_or_else(|e| e.into_inner()) = peers.into_iter().collect();
        let mut map = self.locations.write().unwrap_or_else(|e| e.into_inner());
        map.clear();
        for location in locations {
            map.insert(location.user_id.clone(), location);
        }
    }
}

/// One row of the document outline with the peers editing that cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutlineEntry {
    pub index: usize,
    pub original_id: String,
    pub label: String,
    /// Peers whose reported location resolves to this cell, sorted.
    pub peers: Vec<String>,
}

/// Derive the outline from a cell snapshot plus current presence.
///
/// A peer's indicator lands on the last cell carrying the reported original
/// id, matching where updates to that id would be applied.
pub fn outline(cells: &[Cell], tracker: &PresenceTracker) -> Vec<OutlineEntry> {
    let mapping = IdentityMapping::compute(cells);
    let mut entries: Vec<OutlineEntry> = cells
        .iter()
        .enumerate()
        .map(|(index, cell)| OutlineEntry {
            index,
            original_id: cell.origin().to_string(),
            label: cell_label(cell),
            peers: Vec::new(),
        })
        .collect();

    for location in tracker.locations() {
        if let Some(index) = mapping.last_index_of(&location.cell_id) {
            entries[index].peers.push(location.user_id);
        }
    }
    for entry in &mut entries {
        entry.peers.sort();
    }
    entries
}

/// Display label for a cell: the first markdown heading, or a preview of
/// the first non-empty line.
fn cell_label(cell: &Cell) -> String {
    let first_line = cell
        .source
        .lines()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("");

    let label = match cell.cell_type {
        CellType::Markdown => first_line.trim_start_matches('#').trim(),
        CellType::Code => first_line.trim(),
    };

    if label.len() > OUTLINE_PREVIEW_LEN {
        let cut = label
            .char_indices()
            .take_while(|(i, _)| *i < OUTLINE_PREVIEW_LEN)
            .last()
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(0);
        format!("{}…", &label[..cut])
    } else {
        label.to_string()
    }
}

/// Stable display hue for a peer, degrees in `0..360`.
///
/// FNV-1a keeps the color stable across sessions and processes (unlike
/// `DefaultHasher`).
pub fn peer_hue(user_id: &str) -> u16 {
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;

    let mut hash = FNV_OFFSET;
    for byte in user_id.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    (hash % 360) as u16
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::RecordingApi;

    fn location(user_id: &str, cell_id: &str) -> PeerLocation {
        PeerLocation {
            user_id: user_id.to_string(),
            cell_id: cell_id.to_string(),
            cell_index: None,
        }
    }

    #[test]
    fn test_join_and_leave_idempotent() {
        let tracker = PresenceTracker::new();

        assert!(tracker.peer_joined("p1"));
        assert!(!tracker.peer_joined("p1"));
        assert_eq!(tracker.peer_count(), 1);

        assert!(tracker.peer_left("p1"));
        assert!(!tracker.peer_left("p1"));
        assert_eq!(tracker.peer_count(), 0);
    }

    #[test]
    fn test_location_overwritten_per_peer() {
        let tracker = PresenceTracker::new();

        tracker.set_location(location("p1", "o1"));
        tracker.set_location(location("p1", "o2"));

        assert_eq!(tracker.locations().len(), 1);
        assert_eq!(tracker.location_of("p1").unwrap().cell_id, "o2");
    }

    #[test]
    fn test_location_registers_unseen_peer() {
        let tracker = PresenceTracker::new();
        tracker.set_location(location("p1", "o1"));
        assert_eq!(tracker.connected_peers(), ["p1"]);
    }

    #[test]
    fn test_leave_drops_location() {
        let tracker = PresenceTracker::new();
        tracker.set_location(location("p1", "o1"));
        tracker.peer_left("p1");
        assert!(tracker.location_of("p1").is_none());
    }

    #[test]
    fn test_clear_location_keeps_peer() {
        let tracker = PresenceTracker::new();
        tracker.set_location(location("p1", "o1"));

        let cleared = tracker.clear_location("p1");
        assert_eq!(cleared.unwrap().cell_id, "o1");
        assert_eq!(tracker.connected_peers(), ["p1"]);
    }

    #[tokio::test]
    async fn test_refresh_replaces_state() {
        let tracker = PresenceTracker::new();
        tracker.peer_joined("stale");
        tracker.set_location(location("stale", "o9"));

        let api = RecordingApi::new();
        api.set_peers(vec!["p1".into(), "p2".into()]);
        api.set_locations(vec![location("p1", "o1")]);

        tracker.refresh(&api, "nb1").await;

        assert_eq!(tracker.connected_peers(), ["p1", "p2"]);
        assert!(tracker.location_of("stale").is_none());
        assert_eq!(tracker.location_of("p1").unwrap().cell_id, "o1");
    }

    #[test]
    fn test_outline_labels() {
        let cells = vec![
            Cell::markdown("c1", "## Exercise 1\n\nintro text").with_original_id("o1"),
            Cell::code("c2", "\nimport numpy as np\nprint(1)").with_original_id("o2"),
        ];
        let entries = outline(&cells, &PresenceTracker::new());

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].label, "Exercise 1");
        assert_eq!(entries[1].label, "import numpy as np");
    }

    #[test]
    fn test_outline_indicator_on_last_occurrence() {
        // After a duplicate-above merge, o1 occurs twice
        let cells = vec![
            Cell::code("c3", "# YOUR CODE\n\nprint(1)").with_original_id("o1"),
            Cell::code("c1", "print(2)").with_original_id("o1"),
        ];
        let tracker = PresenceTracker::new();
        tracker.set_location(location("p1", "o1"));
        tracker.set_location(location("p2", "o1"));

        let entries = outline(&cells, &tracker);
        assert!(entries[0].peers.is_empty());
        assert_eq!(entries[1].peers, ["p1", "p2"]);
    }

    #[test]
    fn test_outline_ignores_unmapped_locations() {
        let cells = vec![Cell::code("c1", "x").with_original_id("o1")];
        let tracker = PresenceTracker::new();
        tracker.set_location(location("p1", "gone"));

        let entries = outline(&cells, &tracker);
        assert!(entries[0].peers.is_empty());
    }

    #[test]
    fn test_long_code_label_truncated() {
        let long = "x".repeat(200);
        let cells = vec![Cell::code("c1", &long)];
        let entries = outline(&cells, &PresenceTracker::new());
        assert!(entries[0].label.chars().count() <= OUTLINE_PREVIEW_LEN + 1);
        assert!(entries[0].label.ends_with('…'));
    }

    #[test]
    fn test_peer_hue_stable_and_in_range() {
        let hue = peer_hue("alice");
        assert_eq!(hue, peer_hue("alice"));
        assert!(hue < 360);
        // Different peers usually get different hues
        assert_ne!(peer_hue("alice"), peer_hue("bob"));
    }
}
