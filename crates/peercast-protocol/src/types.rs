use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Control message type tag, as it appears in the envelope's `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Info,
    Join,
    Leave,
    Offer,
    Answer,
    IceCandidate,
    ChatMessage,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Info => "info",
            EventKind::Join => "join",
            EventKind::Leave => "leave",
            EventKind::Offer => "offer",
            EventKind::Answer => "answer",
            EventKind::IceCandidate => "ice-candidate",
            EventKind::ChatMessage => "chat-message",
        }
    }

    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "info" => Some(EventKind::Info),
            "join" => Some(EventKind::Join),
            "leave" => Some(EventKind::Leave),
            "offer" => Some(EventKind::Offer),
            "answer" => Some(EventKind::Answer),
            "ice-candidate" => Some(EventKind::IceCandidate),
            "chat-message" => Some(EventKind::ChatMessage),
            _ => None,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the `data` field of outbound messages is encoded.
///
/// The reference room server decodes client payloads from a JSON-encoded
/// string; other servers accept a plain object.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DataEncoding {
    #[default]
    String,
    Object,
}

/// Remote user listed in the initial `info` message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InfoUser {
    #[serde(alias = "inner_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub avatar: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InfoPayload {
    #[serde(default)]
    pub users: Vec<InfoUser>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JoinPayload {
    pub name: String,
    #[serde(default)]
    pub avatar: String,
}

/// Payload of `offer`, `answer` and `ice-candidate`.
///
/// `content` is an opaque serialized session description or candidate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignalPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatPayload {
    pub content: String,
    #[serde(deserialize_with = "deserialize_timestamp_millis")]
    pub ts: i64,
}

/// Format a timestamp the way chat messages carry it on the wire.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Accepts either an RFC 3339 string or integer epoch milliseconds.
fn deserialize_timestamp_millis<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawTimestamp {
        Millis(i64),
        Text(String),
    }

    match RawTimestamp::deserialize(deserializer)? {
        RawTimestamp::Millis(ms) => Ok(ms),
        RawTimestamp::Text(text) => DateTime::parse_from_rfc3339(&text)
            .map(|ts| ts.timestamp_millis())
            .map_err(serde::de::Error::custom),
    }
}
