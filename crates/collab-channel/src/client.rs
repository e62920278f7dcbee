//! Realtime channel client.
//!
//! Maintains at most one WebSocket connection, bound to the active document.
//! `establish` unconditionally tears down any previous connection before
//! opening the new one so events are never delivered twice. Outbound sends
//! are fire-and-forget: when disconnected they are logged no-ops, never
//! errors, because the pull-based refresh path is the correctness backstop.

use collab_core::wire::{ChannelEvent, MessagePayload};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, warn};

/// Maximum inbound frame size (1MB). Whole-notebook payloads stay well
/// under this.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("WebSocket connect failed: {0}")]
    Connect(#[from] WsError),
}

pub type Result<T> = std::result::Result<T, ChannelError>;

type WriteHalf = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type ReadHalf = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

struct ActiveConnection {
    notebook_id: String,
    write: Arc<Mutex<WriteHalf>>,
    read_task: JoinHandle<()>,
}

impl Drop for ActiveConnection {
    fn drop(&mut self) {
        self.read_task.abort();
    }
}

/// Channel client bound to one user, connecting per-document.
pub struct ChannelClient {
    server_url: String,
    user_id: String,
    event_tx: mpsc::UnboundedSender<ChannelEvent>,
    active: Option<ActiveConnection>,
}

impl ChannelClient {
    /// Create a client plus the receiver its decoded events arrive on.
    pub fn new(
        server_url: &str,
        user_id: &str,
    ) -> (Self, mpsc::UnboundedReceiver<ChannelEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (
            Self {
                server_url: server_url.trim_end_matches('/').to_string(),
                user_id: user_id.to_string(),
                event_tx,
                active: None,
            },
            event_rx,
        )
    }

    pub fn is_connected(&self) -> bool {
        self.active.is_some()
    }

    /// Document id of the live connection, if any.
    pub fn current_notebook(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.notebook_id.as_str())
    }

    /// Bind the channel to `notebook_id`.
    ///
    /// Any previous connection is torn down first, whatever its state, so at
    /// most one connection is ever live. An empty document or user id tears
    /// down without reconnecting.
    pub async fn establish(&mut self, notebook_id: &str) -> Result<()> {
        self.teardown().await;

        if notebook_id.is_empty() || self.user_id.is_empty() {
            debug!("No active document or user, channel stays down");
            return Ok(());
        }

        let url = format!(
            "{}/channel/{}?userId={}",
            self.server_url, notebook_id, self.user_id
        );
        let (ws_stream, _) = connect_async(&url).await?;
        info!(notebook_id, "Channel established");

        let (write, read) = ws_stream.split();
        let read_task = tokio::spawn(Self::read_loop(
            notebook_id.to_string(),
            read,
            self.event_tx.clone(),
        ));

        self.active = Some(ActiveConnection {
            notebook_id: notebook_id.to_string(),
            write: Arc::new(Mutex::new(write)),
            read_task,
        });
        Ok(())
    }

    /// Close the current connection, if any. Idempotent.
    pub async fn teardown(&mut self) {
        if let Some(active) = self.active.take() {
            info!(notebook_id = %active.notebook_id, "Tearing down channel");
            if let Ok(mut w) = active.write.try_lock() {
                let _ = w.send(Message::Close(None)).await;
            }
            active.read_task.abort();
        }
    }

    /// Read loop decoding inbound frames into typed events.
    async fn read_loop(
        notebook_id: String,
        mut read: ReadHalf,
        event_tx: mpsc::UnboundedSender<ChannelEvent>,
    ) {
        loop {
            match read.next().await {
                Some(Ok(msg)) => {
                    let text = match msg {
                        Message::Text(text) => text,
                        Message::Ping(_) | Message::Pong(_) => continue,
                        Message::Close(_) => {
                            debug!(notebook_id, "Received close frame");
                            break;
                        }
                        other => {
                            debug!(notebook_id, "Ignoring non-text frame: {other:?}");
                            continue;
                        }
                    };
                    if text.len() > MAX_FRAME_SIZE {
                        warn!(
                            notebook_id,
                            size = text.len(),
                            "Frame exceeds max size, dropping"
                        );
                        continue;
                    }
                    // Undecodable frames are logged inside from_json
                    if let Some(event) = ChannelEvent::from_json(&text) {
                        if event_tx.send(event).is_err() {
                            break;
                        }
                    }
                }
                Some(Err(e)) => {
                    match e {
                        WsError::ConnectionClosed | WsError::AlreadyClosed => {
                            debug!(notebook_id, "Channel closed");
                        }
                        _ => {
                            error!(notebook_id, "Channel error: {e}");
                        }
                    }
                    break;
                }
                None => {
                    debug!(notebook_id, "Channel stream ended");
                    break;
                }
            }
        }
    }

    /// Send a message on this document's group path. `Some(peer)` addresses
    /// one peer; `None` broadcasts to everyone on the document.
    pub async fn send_to_group(&self, to: Option<&str>, payload: MessagePayload) {
        self.send_event(ChannelEvent::GroupMessage {
            to: to.map(str::to_string),
            payload,
        })
        .await;
    }

    /// Report which cell this user is editing. The server stamps the sender,
    /// so the outbound frame carries no user id.
    pub async fn send_location(&self, cell_id: &str, cell_index: Option<usize>) {
        self.send_event(ChannelEvent::LocationUpdate {
            user_id: None,
            cell_id: cell_id.to_string(),
            cell_index,
        })
        .await;
    }

    /// Report that this user is no longer editing any cell.
    pub async fn clear_location(&self) {
        self.send_event(ChannelEvent::LocationCleared {
            user_id: self.user_id.clone(),
        })
        .await;
    }

    async fn send_event(&self, event: ChannelEvent) {
        let Some(active) = &self.active else {
            debug!("Channel down, dropping outbound event");
            return;
        };
        let mut w = active.write.lock().await;
        if let Err(e) = w.send(Message::Text(event.to_json())).await {
            // At-most-once delivery: report and move on
            warn!(notebook_id = %active.notebook_id, "Send failed: {e}");
        }
    }
}

impl Drop for ChannelClient {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            active.read_task.abort();
        }
    }
}
