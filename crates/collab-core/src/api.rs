//! REST-side service abstraction: peer rosters, peer locations, and the
//! interaction log.
//!
//! The engine never talks HTTP directly; it goes through `CollabApi` so the
//! panel UI, the daemon and the tests can share one seam. The HTTP
//! implementation lives in the channel crate.

use crate::wire::SenderType;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// What the learner did with an update. Logged for instructor analytics.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InteractionKind {
    /// Applied an incoming update immediately.
    UpdateNow,
    /// Deferred an incoming update to the pending list.
    UpdateLater,
    /// Applied every visible pending update in one batch.
    UpdateAll,
    /// Discarded every visible pending update in one batch.
    DeleteAll,
    /// Applied a single update from the pending list.
    ApplySingle,
    /// Removed a single update from the pending list without applying.
    RemoveSingle,
}

/// One interaction log entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InteractionRecord {
    pub notebook_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cell_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_type: Option<SenderType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_id: Option<String>,
    pub kind: InteractionKind,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
}

/// A peer's reported cell location.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PeerLocation {
    pub user_id: String,
    pub cell_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cell_index: Option<usize>,
}

/// Backend queries and the interaction log.
///
/// All methods are fire-and-forget from the engine's point of view:
/// implementations log failures and return empty results rather than
/// propagate errors into document operations.
#[async_trait]
pub trait CollabApi: Send + Sync {
    /// Peers currently connected to this notebook's channel.
    async fn fetch_connected_peers(&self, notebook_id: &str) -> Vec<String>;

    /// Last reported location of each connected peer.
    async fn fetch_peer_locations(&self, notebook_id: &str) -> Vec<PeerLocation>;

    /// Record one learner interaction.
    async fn log_interaction(&self, record: InteractionRecord);
}

#[async_trait]
impl<T: CollabApi> CollabApi for std::sync::Arc<T> {
    async fn fetch_connected_peers(&self, notebook_id: &str) -> Vec<String> {
        (**self).fetch_connected_peers(notebook_id).await
    }

    async fn fetch_peer_locations(&self, notebook_id: &str) -> Vec<PeerLocation> {
        (**self).fetch_peer_locations(notebook_id).await
    }

    async fn log_interaction(&self, record: InteractionRecord) {
        (**self).log_interaction(record).await
    }
}

/// In-memory api double that records logged interactions and serves canned
/// rosters. For tests and offline operation.
#[derive(Default)]
pub struct RecordingApi {
    peers: std::sync::Mutex<Vec<String>>,
    locations: std::sync::Mutex<Vec<PeerLocation>>,
    interactions: std::sync::Mutex<Vec<InteractionRecord>>,
}

impl RecordingApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_peers(&self, peers: Vec<String>) {
        *self.peers.lock().unwrap_or_else(|e| e.into_inner()) = peers;
    }

    pub fn set_locations(&self, locations: Vec<PeerLocation>) {
        *self.locations.lock().unwrap_or_else(|e| e.into_inner()) = locations;
    }

    pub fn interactions(&self) -> Vec<InteractionRecord> {
        self.interactions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl CollabApi for RecordingApi {
    async fn fetch_connected_peers(&self, _notebook_id: &str) -> Vec<String> {
        self.peers.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    async fn fetch_peer_locations(&self, _notebook_id: &str) -> Vec<PeerLocation> {
        self.locations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    async fn log_interaction(&self, record: InteractionRecord) {
        self.interactions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interaction_kind_wire_names() {
        let json = serde_json::to_string(&InteractionKind::UpdateNow).unwrap();
        assert_eq!(json, "\"UPDATE_NOW\"");
        let json = serde_json::to_string(&InteractionKind::DeleteAll).unwrap();
        assert_eq!(json, "\"DELETE_ALL\"");
        let json = serde_json::to_string(&InteractionKind::RemoveSingle).unwrap();
        assert_eq!(json, "\"REMOVE_SINGLE\"");
    }

    #[test]
    fn test_interaction_record_omits_empty_fields() {
        let record = InteractionRecord {
            notebook_id: "nb1".into(),
            cell_id: None,
            sender: None,
            sender_type: None,
            update_id: None,
            kind: InteractionKind::UpdateAll,
            timestamp: 1_700_000_000_000,
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("cellId"));
        assert!(!json.contains("sender"));
        assert!(json.contains("\"kind\":\"UPDATE_ALL\""));
    }

    #[tokio::test]
    async fn test_recording_api() {
        let api = RecordingApi::new();
        api.set_peers(vec!["p1".into(), "p2".into()]);

        assert_eq!(api.fetch_connected_peers("nb1").await.len(), 2);
        assert!(api.fetch_peer_locations("nb1").await.is_empty());

        api.log_interaction(InteractionRecord {
            notebook_id: "nb1".into(),
            cell_id: Some("o1".into()),
            sender: Some("teacher-1".into()),
            sender_type: Some(SenderType::Teacher),
            update_id: Some("u1".into()),
            kind: InteractionKind::UpdateNow,
            timestamp: 1,
        })
        .await;
        assert_eq!(api.interactions().len(), 1);
    }
}
