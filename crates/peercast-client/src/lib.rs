//! Peercast client library
//!
//! Core of a mesh video-call client: the signaling channel to the room
//! server, the participant roster, one peer link per remote participant,
//! room chat, and the session orchestrator that ties them together.

pub mod config;
pub mod error;
pub mod peer;
pub mod session;
pub mod signaling;
pub mod state;

pub use config::ClientConfig;
pub use error::{ChatError, ConnectError, PeerError, Result, SessionError};
pub use session::{ChatEntry, Participant, SessionOrchestrator};
pub use state::{ConnectionPhase, LocalMediaStatus, SessionState};
