//! Control channel to the signaling server
//!
//! One WebSocket per session. Inbound frames are parsed into
//! `ServerMessage`s and delivered in arrival order on a [`ChannelEvents`]
//! stream; outbound `ClientMessage`s are queued to a writer task.

mod channel;

pub use channel::{room_url, LoopbackFrames, SignalingChannel};

use peercast_protocol::ServerMessage;
use tokio::sync::mpsc;

/// Event delivered by the control channel
#[derive(Debug)]
pub enum ChannelEvent {
    Message(ServerMessage),
    /// The transport dropped; no further events follow
    Closed { reason: Option<String> },
}

pub type ChannelEvents = mpsc::UnboundedReceiver<ChannelEvent>;
