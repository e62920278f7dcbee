//! Wire model for the realtime channel.
//!
//! Inbound events are decoded once at the channel boundary into the closed
//! `ChannelEvent` enum and dispatched by exhaustive match; no string
//! comparison on event names leaks past this module. Message payloads accept
//! two shapes for backward compatibility (legacy free text and structured
//! JSON) and normalize to a single downstream form.

use crate::notebook::CellType;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Role of a message sender.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SenderType {
    Teacher,
    Teammate,
}

impl SenderType {
    /// Anything other than exactly "teacher" is a teammate.
    pub fn parse(s: &str) -> Self {
        if s == "teacher" {
            SenderType::Teacher
        } else {
            SenderType::Teammate
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SenderType::Teacher => "teacher",
            SenderType::Teammate => "teammate",
        }
    }
}

/// Whether a message arrived on the direct or the group path.
///
/// Legacy free-text messages carry no sender type; the path determines the
/// assumed default (instructor broadcasts were the legacy direct producers).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageScope {
    Direct,
    Group,
}

/// A message body in either supported wire shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MessagePayload {
    /// Structured form `{message, sender, sender_type}`
    Structured {
        message: String,
        sender: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender_type: Option<String>,
    },
    /// Legacy free-text form `"From <peerId>: <body>"`
    Legacy(String),
}

/// The single downstream message signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedMessage {
    pub message: String,
    pub sender: String,
    pub sender_type: SenderType,
}

impl MessagePayload {
    /// Normalize either wire shape to `(message, sender, sender_type)`.
    ///
    /// Legacy messages keep the full text as the message body; the sender is
    /// extracted from the `From <peerId>: ` prefix when present.
    pub fn normalize(&self, scope: MessageScope) -> NormalizedMessage {
        match self {
            MessagePayload::Structured {
                message,
                sender,
                sender_type,
            } => NormalizedMessage {
                message: message.clone(),
                sender: sender.clone(),
                sender_type: sender_type
                    .as_deref()
                    .map(SenderType::parse)
                    .unwrap_or(SenderType::Teammate),
            },
            MessagePayload::Legacy(text) => {
                let sender = parse_legacy_sender(text).unwrap_or_else(|| match scope {
                    MessageScope::Direct => "teacher".to_string(),
                    MessageScope::Group => "unknown".to_string(),
                });
                NormalizedMessage {
                    message: text.clone(),
                    sender,
                    sender_type: match scope {
                        MessageScope::Direct => SenderType::Teacher,
                        MessageScope::Group => SenderType::Teammate,
                    },
                }
            }
        }
    }
}

/// Extract the peer id from a legacy `"From <peerId>: <body>"` message.
fn parse_legacy_sender(text: &str) -> Option<String> {
    let rest = text.strip_prefix("From ")?;
    let colon = rest.find(':')?;
    let sender = rest[..colon].trim();
    if sender.is_empty() {
        None
    } else {
        Some(sender.to_string())
    }
}

/// The six inbound event kinds, decoded once at the channel boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ChannelEvent {
    #[serde(rename_all = "camelCase")]
    DirectMessage {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<String>,
        payload: MessagePayload,
    },
    #[serde(rename_all = "camelCase")]
    GroupMessage {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<String>,
        payload: MessagePayload,
    },
    #[serde(rename_all = "camelCase")]
    PeerJoined { user_id: String },
    #[serde(rename_all = "camelCase")]
    PeerLeft { user_id: String },
    #[serde(rename_all = "camelCase")]
    LocationUpdate {
        /// Absent on outbound frames; the server stamps the sender.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
        cell_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cell_index: Option<usize>,
    },
    #[serde(rename_all = "camelCase")]
    LocationCleared { user_id: String },
}

impl ChannelEvent {
    /// Decode an inbound JSON frame. None on anything unrecognizable.
    pub fn from_json(data: &str) -> Option<Self> {
        match serde_json::from_str(data) {
            Ok(event) => Some(event),
            Err(e) => {
                warn!("Undecodable channel frame ({e}): {data:.120}");
                None
            }
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("ChannelEvent serialization should not fail")
    }
}

/// Action carried by an update payload.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UpdateAction {
    UpdateCell,
    UpdateNotebook,
}

/// A content-update payload carried in a channel message body.
///
/// `content` stays opaque JSON: a single-cell delta for `update_cell`, a
/// whole-notebook delta (`{cells: [...]}`) for `update_notebook`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpdatePayload {
    pub action: UpdateAction,
    pub content: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_id: Option<String>,
}

impl UpdatePayload {
    /// Parse a message body as an update payload.
    pub fn from_message(message: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(message)
    }

    /// The per-cell entries this payload touches: the content itself for a
    /// cell update, each element of `content.cells` for a notebook update.
    pub fn cell_entries(&self) -> Vec<&serde_json::Value> {
        match self.action {
            UpdateAction::UpdateCell => vec![&self.content],
            UpdateAction::UpdateNotebook => self
                .content
                .get("cells")
                .and_then(|c| c.as_array())
                .map(|cells| cells.iter().collect())
                .unwrap_or_default(),
        }
    }

    /// Resolve the payload's original cell id: `content.id`, else
    /// `content.cell_id`, else the first resolvable entry of
    /// `content.cells`. None when nothing resolves (callers synthesize a
    /// fallback id so the update stays trackable).
    pub fn resolve_cell_id(&self) -> Option<String> {
        if let Some(id) = entry_cell_id(&self.content) {
            return Some(id);
        }
        self.content
            .get("cells")
            .and_then(|c| c.as_array())
            .and_then(|cells| cells.iter().find_map(entry_cell_id))
    }
}

/// Original cell id of one cell entry: `id`, else `cell_id`.
pub fn entry_cell_id(entry: &serde_json::Value) -> Option<String> {
    entry
        .get("id")
        .or_else(|| entry.get("cell_id"))
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

/// Cell type of one cell entry; anything but "markdown" is code.
pub fn entry_cell_type(entry: &serde_json::Value) -> CellType {
    match entry.get("cell_type").and_then(|v| v.as_str()) {
        Some("markdown") => CellType::Markdown,
        _ => CellType::Code,
    }
}

/// Source text of one cell entry. Tolerates both the plain-string and the
/// split-lines representations.
pub fn entry_source(entry: &serde_json::Value) -> String {
    match entry.get("source") {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Array(lines)) => lines
            .iter()
            .filter_map(|l| l.as_str())
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    }
}

/// Synthesize a random id so an unresolvable update stays trackable.
pub fn fallback_cell_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
