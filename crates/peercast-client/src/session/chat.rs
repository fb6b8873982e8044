use chrono::{DateTime, Utc};
use peercast_protocol::ClientMessage;

use crate::error::ChatError;
use crate::signaling::SignalingChannel;
use crate::state::StatePublisher;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEntry {
    pub sender_id: String,
    pub content: String,
    pub timestamp_millis: i64,
}

/// Append-only chat log for the room
pub struct ChatRelay {
    entries: Vec<ChatEntry>,
    publisher: StatePublisher,
}

impl ChatRelay {
    pub fn new(publisher: StatePublisher) -> Self {
        Self {
            entries: Vec::new(),
            publisher,
        }
    }

    /// Send `text` to the room and echo it into the log right away. A
    /// channel that is no longer open drops the frame (logged); the echo
    /// still happens.
    pub fn send(
        &mut self,
        channel: &SignalingChannel,
        local_id: Option<&str>,
        text: &str,
        now: DateTime<Utc>,
    ) -> Result<&ChatEntry, ChatError> {
        if text.trim().is_empty() {
            return Err(ChatError::Empty);
        }
        let local_id = local_id.ok_or(ChatError::NotJoined)?;

        let message = ClientMessage::ChatMessage {
            content: text.to_string(),
            ts: now,
        };
        channel.send(&message);

        Ok(self.append(ChatEntry {
            sender_id: local_id.to_string(),
            content: text.to_string(),
            timestamp_millis: now.timestamp_millis(),
        }))
    }

    pub fn on_receive(&mut self, from: &str, content: String, timestamp_millis: i64) {
        self.append(ChatEntry {
            sender_id: from.to_string(),
            content,
            timestamp_millis,
        });
    }

    pub fn entries(&self) -> &[ChatEntry] {
        &self.entries
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.publisher.messages(Vec::new());
    }

    fn append(&mut self, entry: ChatEntry) -> &ChatEntry {
        self.entries.push(entry);
        self.publisher.messages(self.entries.clone());
        &self.entries[self.entries.len() - 1]
    }
}
