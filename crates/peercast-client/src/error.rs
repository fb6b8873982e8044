use peercast_media::MediaError;
use thiserror::Error;

/// The control channel could not be opened
#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("Invalid signaling endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Signaling server unreachable: {0}")]
    Unreachable(#[source] tokio_tungstenite::tungstenite::Error),

    #[error("Signaling server rejected the room token (HTTP {status})")]
    Rejected { status: u16 },
}

/// Failure scoped to a single peer link
#[derive(Error, Debug, Clone)]
pub enum PeerError {
    #[error("No local media available")]
    MediaUnavailable,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    #[error("Peer connection error: {0}")]
    Backend(String),

    #[error("Negotiation did not complete in time")]
    Timeout,
}

impl From<webrtc::Error> for PeerError {
    fn from(err: webrtc::Error) -> Self {
        match err {
            webrtc::Error::ErrNoRemoteDescription => PeerError::InvalidState(err.to_string()),
            other => PeerError::Backend(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for PeerError {
    fn from(err: serde_json::Error) -> Self {
        PeerError::Negotiation(format!("Undecodable signaling content: {}", err))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    #[error("Chat message is empty")]
    Empty,

    #[error("Not joined to a room yet")]
    NotJoined,
}

/// Errors surfaced to the caller of the session API
#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error("Local media unavailable: {0}")]
    MediaUnavailable(#[from] MediaError),

    #[error("A session is already connecting or connected")]
    AlreadyActive,

    #[error("Connect attempt aborted by disconnect")]
    Aborted,

    #[error("Not connected to a room")]
    NotConnected,

    #[error(transparent)]
    Chat(#[from] ChatError),
}

pub type Result<T> = std::result::Result<T, SessionError>;
