//! HTTP implementation of the backend api.
//!
//! Every method degrades on failure: roster fetches return empty and the
//! interaction log drops the record, with a warning either way. Network
//! trouble must never surface as an error inside a document operation.

use async_trait::async_trait;
use collab_core::api::{CollabApi, InteractionRecord, PeerLocation};
use std::time::Duration;
use tracing::{debug, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// REST client for the collaboration backend.
pub struct RestApi {
    client: reqwest::Client,
    base_url: String,
}

impl RestApi {
    pub fn new(base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned + Default>(&self, url: String) -> T {
        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(url, "Request failed: {e}");
                return T::default();
            }
        };
        if !response.status().is_success() {
            warn!(url, status = %response.status(), "Request rejected");
            return T::default();
        }
        match response.json().await {
            Ok(value) => value,
            Err(e) => {
                warn!(url, "Unreadable response body: {e}");
                T::default()
            }
        }
    }
}

#[async_trait]
impl CollabApi for RestApi {
    async fn fetch_connected_peers(&self, notebook_id: &str) -> Vec<String> {
        self.get_json(format!("{}/notebooks/{notebook_id}/peers", self.base_url))
            .await
    }

    async fn fetch_peer_locations(&self, notebook_id: &str) -> Vec<PeerLocation> {
        self.get_json(format!(
            "{}/notebooks/{notebook_id}/locations",
            self.base_url
        ))
        .await
    }

    async fn log_interaction(&self, record: InteractionRecord) {
        let url = format!("{}/interactions", self.base_url);
        match self.client.post(&url).json(&record).send().await {
            Ok(response) if response.status().is_success() => {
                debug!(kind = ?record.kind, "Interaction logged");
            }
            Ok(response) => {
                warn!(url, status = %response.status(), "Interaction log rejected");
            }
            Err(e) => {
                warn!(url, "Interaction log failed: {e}");
            }
        }
    }
}
