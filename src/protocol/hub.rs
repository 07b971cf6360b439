//! GRUniChat hub wire types.
//!
//! The hub speaks one JSON shape for every message:
//!
//! ```text
//! {from, type, body:{sender, chatMessage?, command?, eventDetail?, executeAt?},
//!  totalId, currentTime, extra?}
//! ```
//!
//! [`CanonicalMessage`] is the typed form used inside the bridge. The kind
//! and its payload live in one enum, so a chat message can never carry a
//! command and vice versa. [`WireMessage`] is the literal JSON shape and is
//! only touched by serde.

use chrono::Local;
use serde::{Deserialize, Serialize};

use crate::error::PayloadError;

/// Timestamp format used in `currentTime`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Prefix of a routing target addressing a single group.
pub const GROUP_TARGET_PREFIX: &str = "group_";

/// Message kind and its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageContent {
    /// Chat text from a user.
    Chat(String),
    /// A command for the hub clients to execute. May be empty.
    Command(String),
    /// A server-side event description.
    Event(String),
    /// A kind this bridge does not translate, kept for logging.
    Other(String),
}

impl MessageContent {
    /// Wire name of the kind.
    pub fn kind(&self) -> &str {
        match self {
            MessageContent::Chat(_) => "chat",
            MessageContent::Command(_) => "command",
            MessageContent::Event(_) => "event",
            MessageContent::Other(kind) => kind,
        }
    }
}

/// Where a canonical message should be delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// No target: every configured service group.
    Broadcast,
    /// A single group.
    Group(i64),
}

/// A hub message as used inside the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "WireMessage", from = "WireMessage")]
pub struct CanonicalMessage {
    /// Identity of the client that produced the message.
    pub origin: String,
    /// Unique per message, never reused.
    pub correlation_id: String,
    pub timestamp: String,
    pub sender: String,
    pub content: MessageContent,
    /// `executeAt`. `None` means broadcast.
    pub routing_target: Option<String>,
    pub extra: Option<serde_json::Map<String, serde_json::Value>>,
}

impl CanonicalMessage {
    fn new(origin: &str, sender: &str, content: MessageContent) -> Self {
        Self {
            origin: origin.to_string(),
            correlation_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Local::now().format(TIMESTAMP_FORMAT).to_string(),
            sender: sender.to_string(),
            content,
            routing_target: None,
            extra: None,
        }
    }

    /// A chat message with a fresh correlation id and timestamp.
    pub fn chat(origin: &str, sender: &str, text: impl Into<String>) -> Self {
        Self::new(origin, sender, MessageContent::Chat(text.into()))
    }

    /// A command message with a fresh correlation id and timestamp.
    pub fn command(origin: &str, sender: &str, command: impl Into<String>) -> Self {
        Self::new(origin, sender, MessageContent::Command(command.into()))
    }

    /// An event message with a fresh correlation id and timestamp.
    pub fn event(origin: &str, detail: impl Into<String>) -> Self {
        Self::new(origin, "", MessageContent::Event(detail.into()))
    }

    /// Set the routing target.
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.routing_target = Some(target.into());
        self
    }

    /// Resolve the routing target.
    ///
    /// Only `group_<id>` is a defined route. Anything else, including a
    /// `group_` prefix with a non-numeric id, is an error.
    pub fn route(&self) -> Result<Route, PayloadError> {
        let Some(target) = self.routing_target.as_deref() else {
            return Ok(Route::Broadcast);
        };
        let id = target
            .strip_prefix(GROUP_TARGET_PREFIX)
            .ok_or_else(|| PayloadError::InvalidRoutingTarget(target.to_string()))?;
        id.parse::<i64>()
            .map(Route::Group)
            .map_err(|_| PayloadError::InvalidRoutingTarget(target.to_string()))
    }
}

/// Routing target addressing a single group.
pub fn group_target(group_id: i64) -> String {
    format!("{GROUP_TARGET_PREFIX}{group_id}")
}

/// Literal JSON shape of a hub message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    #[serde(default)]
    pub from: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub body: WireBody,
    #[serde(default)]
    pub total_id: String,
    #[serde(default)]
    pub current_time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Literal JSON shape of a hub message body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireBody {
    #[serde(default)]
    pub sender: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execute_at: Option<String>,
}

impl From<CanonicalMessage> for WireMessage {
    fn from(msg: CanonicalMessage) -> Self {
        let kind = msg.content.kind().to_string();
        let mut body = WireBody {
            sender: msg.sender,
            execute_at: msg.routing_target,
            ..WireBody::default()
        };
        match msg.content {
            MessageContent::Chat(text) => body.chat_message = Some(text),
            MessageContent::Command(command) => body.command = Some(command),
            MessageContent::Event(detail) => body.event_detail = Some(detail),
            MessageContent::Other(_) => {}
        }
        WireMessage {
            from: msg.origin,
            kind,
            body,
            total_id: msg.correlation_id,
            current_time: msg.timestamp,
            extra: msg.extra,
        }
    }
}

impl From<WireMessage> for CanonicalMessage {
    fn from(wire: WireMessage) -> Self {
        let body = wire.body;
        let content = match wire.kind.as_str() {
            "chat" => MessageContent::Chat(body.chat_message.unwrap_or_default()),
            "command" => MessageContent::Command(body.command.unwrap_or_default()),
            "event" => MessageContent::Event(body.event_detail.unwrap_or_default()),
            _ => MessageContent::Other(wire.kind),
        };
        CanonicalMessage {
            origin: wire.from,
            correlation_id: wire.total_id,
            timestamp: wire.current_time,
            sender: body.sender,
            content,
            routing_target: body.execute_at.filter(|t| !t.is_empty()),
            extra: wire.extra,
        }
    }
}

/// Frame sent right after connecting so the hub knows who we are.
#[derive(Debug, Clone, Serialize)]
pub struct HelloFrame<'a> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub from: &'a str,
}

impl<'a> HelloFrame<'a> {
    pub fn new(client_id: &'a str) -> Self {
        Self {
            kind: "hello",
            from: client_id,
        }
    }
}
