use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ProtocolError;
use crate::types::{
    format_timestamp, ChatPayload, DataEncoding, EventKind, InfoPayload, JoinPayload,
    SignalPayload,
};

/// Message received from the signaling server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerMessage {
    /// Participant the server attributes this message to
    pub from: Option<String>,
    pub event: ServerEvent,
}

/// Closed set of control events a client can receive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// Initial room state; `from` is the id the server assigned to us
    Info(InfoPayload),
    /// Another participant joined
    Join(JoinPayload),
    /// A participant left
    Leave,
    /// Session description offer from a peer
    Offer(SignalPayload),
    /// Session description answer from a peer
    Answer(SignalPayload),
    /// Network candidate from a peer
    IceCandidate(SignalPayload),
    /// Chat text from a participant
    ChatMessage(ChatPayload),
}

impl ServerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ServerEvent::Info(_) => EventKind::Info,
            ServerEvent::Join(_) => EventKind::Join,
            ServerEvent::Leave => EventKind::Leave,
            ServerEvent::Offer(_) => EventKind::Offer,
            ServerEvent::Answer(_) => EventKind::Answer,
            ServerEvent::IceCandidate(_) => EventKind::IceCandidate,
            ServerEvent::ChatMessage(_) => EventKind::ChatMessage,
        }
    }
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    from: Option<String>,
    #[serde(default)]
    data: Value,
}

impl ServerMessage {
    /// Parse one text frame from the control channel.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let raw: RawEnvelope = serde_json::from_str(text)?;
        let kind =
            EventKind::parse(&raw.kind).ok_or_else(|| ProtocolError::UnknownType(raw.kind.clone()))?;
        let from = raw.from.filter(|id| !id.is_empty());

        let event = match kind {
            EventKind::Info => ServerEvent::Info(decode_data(kind, raw.data)?),
            EventKind::Join => ServerEvent::Join(decode_data(kind, raw.data)?),
            EventKind::Leave => ServerEvent::Leave,
            EventKind::Offer => ServerEvent::Offer(decode_data(kind, raw.data)?),
            EventKind::Answer => ServerEvent::Answer(decode_data(kind, raw.data)?),
            EventKind::IceCandidate => ServerEvent::IceCandidate(decode_data(kind, raw.data)?),
            EventKind::ChatMessage => ServerEvent::ChatMessage(decode_data(kind, raw.data)?),
        };

        Ok(Self { from, event })
    }

    /// Sender id, required for every event the server forwards.
    pub fn sender(&self) -> Result<&str, ProtocolError> {
        self.from
            .as_deref()
            .ok_or(ProtocolError::MissingSender(self.event.kind()))
    }
}

/// Payloads arrive either as a JSON object or as a JSON-encoded string,
/// depending on whether the server generated or relayed the message.
fn decode_data<T: DeserializeOwned>(kind: EventKind, data: Value) -> Result<T, ProtocolError> {
    let value = match data {
        Value::Null => return Err(ProtocolError::MissingData(kind)),
        Value::String(encoded) => serde_json::from_str(&encoded)
            .map_err(|source| ProtocolError::InvalidData { kind, source })?,
        other => other,
    };

    serde_json::from_value(value).map_err(|source| ProtocolError::InvalidData { kind, source })
}

/// Messages a client sends to the signaling server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// Session description offer for one peer
    Offer { to: String, content: String },

    /// Session description answer for one peer
    Answer { to: String, content: String },

    /// Locally gathered network candidate for one peer
    IceCandidate { to: String, content: String },

    /// Chat text for the whole room
    ChatMessage { content: String, ts: DateTime<Utc> },
}

impl ClientMessage {
    pub fn kind(&self) -> EventKind {
        match self {
            ClientMessage::Offer { .. } => EventKind::Offer,
            ClientMessage::Answer { .. } => EventKind::Answer,
            ClientMessage::IceCandidate { .. } => EventKind::IceCandidate,
            ClientMessage::ChatMessage { .. } => EventKind::ChatMessage,
        }
    }

    /// Peer this message is addressed to, if it is targeted.
    pub fn recipient(&self) -> Option<&str> {
        match self {
            ClientMessage::Offer { to, .. }
            | ClientMessage::Answer { to, .. }
            | ClientMessage::IceCandidate { to, .. } => Some(to),
            ClientMessage::ChatMessage { .. } => None,
        }
    }

    /// Serialize into a text frame. The client never sets `from`.
    pub fn encode(&self, encoding: DataEncoding) -> Result<String, ProtocolError> {
        let data = match self {
            ClientMessage::Offer { to, content }
            | ClientMessage::Answer { to, content }
            | ClientMessage::IceCandidate { to, content } => json!({ "to": to, "content": content }),
            ClientMessage::ChatMessage { content, ts } => {
                json!({ "content": content, "ts": format_timestamp(*ts) })
            }
        };

        let data = match encoding {
            DataEncoding::Object => data,
            DataEncoding::String => Value::String(serde_json::to_string(&data)?),
        };

        let frame = json!({ "type": self.kind().as_str(), "data": data });
        Ok(serde_json::to_string(&frame)?)
    }
}
