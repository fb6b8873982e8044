//! Mesh peer links
//!
//! One [`PeerConnection`] per remote participant, created through a
//! [`PeerConnector`]. Connection work runs on a per-link worker task; its
//! results come back to the session as [`PeerEvent`]s tagged with the
//! link's epoch so results of a replaced or closed link can be discarded.

mod link;
mod manager;
mod rtc;

pub use link::{LinkRole, NegotiationState, PeerLinkInfo};
pub use manager::PeerConnectionManager;
pub use rtc::WebRtcConnector;

use std::sync::Arc;

use async_trait::async_trait;
use peercast_media::{LocalMedia, RemoteTrack};
use tokio::sync::mpsc;

use crate::error::PeerError;

/// Creates peer connections with the local tracks attached
#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn connect(
        &self,
        media: &LocalMedia,
        ctx: LinkContext,
    ) -> Result<Arc<dyn PeerConnection>, PeerError>;
}

/// One point-to-point media connection.
///
/// Descriptions and candidates are opaque serialized strings as carried in
/// the signaling `content` field.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Create an offer, apply it locally and return it serialized.
    async fn create_offer(&self) -> Result<String, PeerError>;

    /// Create an answer to the applied remote offer, apply it locally and
    /// return it serialized.
    async fn create_answer(&self) -> Result<String, PeerError>;

    async fn set_remote_description(&self, description: &str) -> Result<(), PeerError>;

    async fn add_ice_candidate(&self, candidate: &str) -> Result<(), PeerError>;

    async fn close(&self) -> Result<(), PeerError>;
}

/// Callback handle a connection uses to report asynchronous events for its
/// link.
#[derive(Clone)]
pub struct LinkContext {
    peer_id: String,
    epoch: u64,
    events: mpsc::UnboundedSender<PeerEvent>,
}

impl LinkContext {
    pub(crate) fn new(
        peer_id: impl Into<String>,
        epoch: u64,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Self {
        Self {
            peer_id: peer_id.into(),
            epoch,
            events,
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// A local ICE candidate was gathered.
    pub fn candidate_discovered(&self, candidate: String) {
        self.report(PeerEventKind::CandidateDiscovered(candidate));
    }

    /// A remote track arrived.
    pub fn track_received(&self, track: RemoteTrack) {
        self.report(PeerEventKind::TrackReceived(track));
    }

    /// The transport failed after negotiation.
    pub fn connection_failed(&self, reason: impl Into<String>) {
        self.report(PeerEventKind::Failed(PeerError::Backend(reason.into())));
    }

    pub(crate) fn report(&self, kind: PeerEventKind) {
        // The session may already be gone
        let _ = self.events.send(PeerEvent {
            peer_id: self.peer_id.clone(),
            epoch: self.epoch,
            kind,
        });
    }
}

#[derive(Debug)]
pub struct PeerEvent {
    pub peer_id: String,
    pub epoch: u64,
    pub kind: PeerEventKind,
}

#[derive(Debug)]
pub enum PeerEventKind {
    OfferCreated(String),
    RemoteDescriptionApplied,
    AnswerCreated(String),
    CandidateDiscovered(String),
    TrackReceived(RemoteTrack),
    Failed(PeerError),
    DeadlineElapsed,
}

pub type PeerEvents = mpsc::UnboundedReceiver<PeerEvent>;
