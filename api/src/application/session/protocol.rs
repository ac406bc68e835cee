use serde::Deserialize;
use serde_json::{Map, Value, json};

use super::SessionError;
use crate::domain::documents::cursor::{CURSOR, DELETE_CURSOR, NEW_CURSOR};

pub const MSG_SUBSCRIBE: &str = "subscribe";
pub const MSG_OP: &str = "op";
pub const MSG_CURSOR: &str = "cursor";
pub const MSG_EVENT: &str = "event";

pub const EVENT_PING: &str = "ping";
pub const EVENT_PONG: &str = "pong";
pub const EVENT_LOADED: &str = "loaded";
pub const EVENT_PASTE: &str = "paste";

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SubscribeMessage {
    #[serde(rename = "docID")]
    pub doc_id: String,
    #[serde(rename = "authorID", default)]
    pub author_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OpMessage {
    pub op: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EventMessage {
    pub event: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

/// Inbound frame, dispatched on its `type` field.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Subscribe(SubscribeMessage),
    Op(OpMessage),
    /// Cursor frames are relayed as raw JSON after identity stamping.
    Cursor(String),
    Event(EventMessage),
}

fn decode<T: serde::de::DeserializeOwned>(text: &str, kind: &str) -> Result<T, SessionError> {
    serde_json::from_str(text).map_err(|e| SessionError::Malformed(format!("{kind}: {e}")))
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self, SessionError> {
        let envelope: Envelope =
            serde_json::from_str(text).map_err(|e| SessionError::Malformed(e.to_string()))?;
        let kind = envelope
            .kind
            .ok_or_else(|| SessionError::Malformed("missing type".into()))?;
        match kind.as_str() {
            MSG_SUBSCRIBE => {
                let mut msg: SubscribeMessage = decode(text, MSG_SUBSCRIBE)?;
                if msg.author_id.as_deref().is_some_and(str::is_empty) {
                    msg.author_id = None;
                }
                Ok(ClientMessage::Subscribe(msg))
            }
            MSG_OP => Ok(ClientMessage::Op(decode(text, MSG_OP)?)),
            MSG_CURSOR => Ok(ClientMessage::Cursor(text.to_string())),
            MSG_EVENT => Ok(ClientMessage::Event(decode(text, MSG_EVENT)?)),
            _ => Err(SessionError::UnknownType(kind)),
        }
    }
}

pub fn auth_frame(author_id: &str) -> String {
    json!({"type": "auth", "authorID": author_id}).to_string()
}

pub fn event_frame(event: &str) -> String {
    json!({"type": "event", "event": event}).to_string()
}

pub fn error_frame(message: &str) -> String {
    json!({"type": "error", "error": message}).to_string()
}

/// Outbound frame class. Cursor traffic is high-volume and kept out of the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Cursor,
    Other,
}

impl FrameKind {
    /// Classifies a relayed payload by its `type` field; raw ops are not JSON.
    pub fn of_payload(payload: &str) -> Self {
        match serde_json::from_str::<Envelope>(payload) {
            Ok(Envelope { kind: Some(kind) })
                if matches!(kind.as_str(), CURSOR | NEW_CURSOR | DELETE_CURSOR) =>
            {
                FrameKind::Cursor
            }
            _ => FrameKind::Other,
        }
    }
}
