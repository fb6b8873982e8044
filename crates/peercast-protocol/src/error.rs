use thiserror::Error;

use crate::types::EventKind;

/// A control message that is malformed or arrives out of sequence.
///
/// Protocol errors are never fatal to a session: the offending message is
/// logged and dropped.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed control message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown message type: {0}")]
    UnknownType(String),

    #[error("Missing payload for {0} message")]
    MissingData(EventKind),

    #[error("Invalid payload for {kind} message: {source}")]
    InvalidData {
        kind: EventKind,
        #[source]
        source: serde_json::Error,
    },

    #[error("Missing sender on {0} message")]
    MissingSender(EventKind),

    #[error("Room info received twice in one session")]
    DuplicateInfo,

    #[error("Message from unknown participant {0}")]
    UnknownSender(String),

    #[error("Unexpected {kind} from {from} in negotiation state {state}")]
    OutOfSequence {
        kind: EventKind,
        from: String,
        state: String,
    },
}
