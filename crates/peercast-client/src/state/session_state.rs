use std::sync::Arc;

use peercast_media::RemoteStream;
use tokio::sync::watch;

use crate::peer::PeerLinkInfo;
use crate::session::{ChatEntry, Participant};

/// Connection phase of the current session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionPhase {
    #[default]
    Idle,
    Connecting,
    Connected,
    /// The control channel dropped; `connect` starts a fresh session
    Disconnected,
}

/// Enabled flags of the local tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LocalMediaStatus {
    pub active: bool,
    pub microphone_enabled: bool,
    pub camera_enabled: bool,
}

struct Senders {
    phase: watch::Sender<ConnectionPhase>,
    participants: watch::Sender<Vec<Participant>>,
    messages: watch::Sender<Vec<ChatEntry>>,
    remote_streams: watch::Sender<Vec<RemoteStream>>,
    peer_links: watch::Sender<Vec<PeerLinkInfo>>,
    local_media: watch::Sender<LocalMediaStatus>,
}

/// Write side of the session observers.
///
/// Only the session's control loop publishes; callers hold a
/// [`SessionState`] and only ever see snapshots.
#[derive(Clone)]
pub struct StatePublisher {
    inner: Arc<Senders>,
}

impl StatePublisher {
    pub fn new() -> (Self, SessionState) {
        let (phase, phase_rx) = watch::channel(ConnectionPhase::Idle);
        let (participants, participants_rx) = watch::channel(Vec::new());
        let (messages, messages_rx) = watch::channel(Vec::new());
        let (remote_streams, remote_streams_rx) = watch::channel(Vec::new());
        let (peer_links, peer_links_rx) = watch::channel(Vec::new());
        let (local_media, local_media_rx) = watch::channel(LocalMediaStatus::default());

        let publisher = Self {
            inner: Arc::new(Senders {
                phase,
                participants,
                messages,
                remote_streams,
                peer_links,
                local_media,
            }),
        };

        let state = SessionState {
            phase: phase_rx,
            participants: participants_rx,
            messages: messages_rx,
            remote_streams: remote_streams_rx,
            peer_links: peer_links_rx,
            local_media: local_media_rx,
        };

        (publisher, state)
    }

    pub fn phase(&self, phase: ConnectionPhase) {
        self.inner.phase.send_if_modified(|current| {
            if *current == phase {
                return false;
            }
            tracing::debug!("Session phase {:?} -> {:?}", current, phase);
            *current = phase;
            true
        });
    }

    pub fn participants(&self, participants: Vec<Participant>) {
        self.inner.participants.send_replace(participants);
    }

    pub fn messages(&self, messages: Vec<ChatEntry>) {
        self.inner.messages.send_replace(messages);
    }

    pub fn remote_streams(&self, streams: Vec<RemoteStream>) {
        self.inner.remote_streams.send_replace(streams);
    }

    pub fn peer_links(&self, links: Vec<PeerLinkInfo>) {
        self.inner.peer_links.send_replace(links);
    }

    pub fn local_media(&self, status: LocalMediaStatus) {
        self.inner.local_media.send_replace(status);
    }
}

/// Read-only view of the session for the surrounding application
#[derive(Clone)]
pub struct SessionState {
    phase: watch::Receiver<ConnectionPhase>,
    participants: watch::Receiver<Vec<Participant>>,
    messages: watch::Receiver<Vec<ChatEntry>>,
    remote_streams: watch::Receiver<Vec<RemoteStream>>,
    peer_links: watch::Receiver<Vec<PeerLinkInfo>>,
    local_media: watch::Receiver<LocalMediaStatus>,
}

impl SessionState {
    pub fn phase(&self) -> ConnectionPhase {
        *self.phase.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.phase() == ConnectionPhase::Connected
    }

    pub fn participants(&self) -> Vec<Participant> {
        self.participants.borrow().clone()
    }

    pub fn local_participant(&self) -> Option<Participant> {
        self.participants.borrow().iter().find(|p| p.is_local).cloned()
    }

    pub fn messages(&self) -> Vec<ChatEntry> {
        self.messages.borrow().clone()
    }

    pub fn remote_streams(&self) -> Vec<RemoteStream> {
        self.remote_streams.borrow().clone()
    }

    pub fn peer_links(&self) -> Vec<PeerLinkInfo> {
        self.peer_links.borrow().clone()
    }

    pub fn local_media(&self) -> LocalMediaStatus {
        *self.local_media.borrow()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<ConnectionPhase> {
        self.phase.clone()
    }

    pub fn subscribe_participants(&self) -> watch::Receiver<Vec<Participant>> {
        self.participants.clone()
    }

    pub fn subscribe_messages(&self) -> watch::Receiver<Vec<ChatEntry>> {
        self.messages.clone()
    }

    pub fn subscribe_remote_streams(&self) -> watch::Receiver<Vec<RemoteStream>> {
        self.remote_streams.clone()
    }

    pub fn subscribe_peer_links(&self) -> watch::Receiver<Vec<PeerLinkInfo>> {
        self.peer_links.clone()
    }
}
