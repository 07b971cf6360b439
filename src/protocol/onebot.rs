//! OneBot v11 wire types.
//!
//! Only the subset the bridge needs: inbound message events, API responses
//! to our own actions, and the `send_group_msg` action.

use serde::{Deserialize, Serialize};

use crate::error::PayloadError;

/// An inbound event frame.
///
/// Meta events (heartbeats, lifecycle) decode too; their `post_type` is
/// simply not `"message"`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InboundEvent {
    /// Event category. Only `"message"` is translated.
    #[serde(default)]
    pub post_type: String,
    /// Channel kind. Only `"group"` is served.
    #[serde(default)]
    pub message_type: String,
    #[serde(default)]
    pub user_id: i64,
    #[serde(default)]
    pub group_id: i64,
    #[serde(default)]
    pub message: MessagePayload,
    #[serde(default)]
    pub sender: EventSender,
}

impl InboundEvent {
    /// Display name: the in-group card when set, otherwise the nickname.
    pub fn display_name(&self) -> &str {
        if self.sender.card.is_empty() {
            &self.sender.nickname
        } else {
            &self.sender.card
        }
    }
}

/// Sender block of a message event.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventSender {
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub card: String,
}

/// Message content, which OneBot sends either as a CQ string or as an
/// array of typed segments.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum MessagePayload {
    Text(String),
    Segments(Vec<Segment>),
    /// Any other JSON value.
    Unknown(serde_json::Value),
}

impl Default for MessagePayload {
    fn default() -> Self {
        MessagePayload::Unknown(serde_json::Value::Null)
    }
}

impl MessagePayload {
    /// Flatten the payload into plain text.
    ///
    /// Segments contribute only when their type is `"text"`; they are joined
    /// in order with no separator.
    pub fn text(&self) -> Result<String, PayloadError> {
        match self {
            MessagePayload::Text(text) => Ok(text.clone()),
            MessagePayload::Segments(segments) => Ok(segments
                .iter()
                .filter_map(Segment::text)
                .collect::<String>()),
            MessagePayload::Unknown(value) => Err(PayloadError::UnknownShape(json_kind(value))),
        }
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// One typed message segment.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Segment {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Segment {
    /// Text of a `"text"` segment; `None` for every other segment type.
    pub fn text(&self) -> Option<&str> {
        if self.kind != "text" {
            return None;
        }
        self.data.get("text").and_then(serde_json::Value::as_str)
    }
}

/// Response to an action we sent, matched by `echo`.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse {
    pub status: String,
    #[serde(default)]
    pub retcode: i64,
    #[serde(default)]
    pub echo: Option<String>,
}

impl ApiResponse {
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// A decoded frame from the OneBot gateway.
#[derive(Debug, Clone)]
pub enum InboundFrame {
    Event(Box<InboundEvent>),
    Response(ApiResponse),
}

impl InboundFrame {
    /// Decode a raw text frame.
    ///
    /// Frames carrying `retcode` or `echo` without a `post_type` are
    /// responses to our own actions; everything else is an event.
    pub fn parse(raw: &str) -> Result<Self, PayloadError> {
        let value: serde_json::Value = serde_json::from_str(raw)?;
        let is_response = value.get("post_type").is_none()
            && (value.get("retcode").is_some() || value.get("echo").is_some());
        if is_response {
            Ok(InboundFrame::Response(serde_json::from_value(value)?))
        } else {
            Ok(InboundFrame::Event(Box::new(serde_json::from_value(value)?)))
        }
    }
}

/// Prefix of the `echo` field on actions the bridge sends.
pub const ECHO_PREFIX: &str = "adapter_";

/// `send_group_msg` action.
#[derive(Debug, Clone, Serialize)]
pub struct SendGroupMessage<'a> {
    action: &'static str,
    params: SendGroupParams<'a>,
    echo: String,
}

#[derive(Debug, Clone, Serialize)]
struct SendGroupParams<'a> {
    group_id: i64,
    message: &'a str,
}

impl<'a> SendGroupMessage<'a> {
    pub fn new(group_id: i64, message: &'a str) -> Self {
        Self {
            action: "send_group_msg",
            params: SendGroupParams { group_id, message },
            echo: format!("{ECHO_PREFIX}{}", uuid::Uuid::new_v4()),
        }
    }

    pub fn echo(&self) -> &str {
        &self.echo
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn event(value: serde_json::Value) -> InboundEvent {
        match InboundFrame::parse(&value.to_string()).unwrap() {
            InboundFrame::Event(event) => *event,
            InboundFrame::Response(r) => panic!("expected event, got response {r:?}"),
        }
    }

    #[test]
    fn test_string_payload_passthrough() {
        let e = event(json!({
            "post_type": "message", "message_type": "group",
            "user_id": 1, "group_id": 2, "message": "hello [CQ:face,id=1]",
            "sender": {"user_id": 1, "nickname": "nick"}
        }));
        assert_eq!(e.message.text().unwrap(), "hello [CQ:face,id=1]");
        assert_eq!(e.display_name(), "nick");
    }

    #[test]
    fn test_segments_keep_only_text_in_order() {
        let e = event(json!({
            "post_type": "message", "message_type": "group",
            "message": [
                {"type": "text", "data": {"text": "foo "}},
                {"type": "image", "data": {"file": "a.png"}},
                {"type": "at", "data": {"qq": "123"}},
                {"type": "text", "data": {"text": "bar"}}
            ],
            "sender": {"nickname": "nick", "card": "Card Name"}
        }));
        assert_eq!(e.message.text().unwrap(), "foo bar");
        assert_eq!(e.display_name(), "Card Name");
    }

    #[test]
    fn test_text_segment_without_text_field_is_skipped() {
        let payload = MessagePayload::Segments(vec![
            Segment { kind: "text".to_string(), data: json!({}) },
            Segment { kind: "text".to_string(), data: json!({"text": "x"}) },
        ]);
        assert_eq!(payload.text().unwrap(), "x");
    }

    #[test]
    fn test_unknown_payload_shape() {
        let e = event(json!({"post_type": "message", "message": {"weird": true}}));
        assert!(matches!(e.message.text(), Err(PayloadError::UnknownShape("object"))));

        let missing = event(json!({"post_type": "message"}));
        assert!(matches!(missing.message.text(), Err(PayloadError::UnknownShape("null"))));
    }

    #[test]
    fn test_meta_event_decodes() {
        let e = event(json!({"post_type": "meta_event", "meta_event_type": "heartbeat"}));
        assert_eq!(e.post_type, "meta_event");
    }

    #[test]
    fn test_api_response_detected() {
        let frame = InboundFrame::parse(
            &json!({"status": "failed", "retcode": 100, "echo": "adapter_x"}).to_string(),
        )
        .unwrap();
        match frame {
            InboundFrame::Response(r) => {
                assert!(!r.is_ok());
                assert_eq!(r.retcode, 100);
                assert_eq!(r.echo.as_deref(), Some("adapter_x"));
            }
            InboundFrame::Event(_) => panic!("expected response"),
        }
    }

    #[test]
    fn test_malformed_frame() {
        assert!(matches!(
            InboundFrame::parse("{not json"),
            Err(PayloadError::Malformed(_))
        ));
    }

    #[test]
    fn test_send_group_message_shape() {
        let action = SendGroupMessage::new(42, "hi");
        let value = serde_json::to_value(&action).unwrap();
        assert_eq!(value["action"], "send_group_msg");
        assert_eq!(value["params"], json!({"group_id": 42, "message": "hi"}));
        assert!(value["echo"].as_str().unwrap().starts_with(ECHO_PREFIX));
        assert_eq!(value["echo"], action.echo());
    }
}
