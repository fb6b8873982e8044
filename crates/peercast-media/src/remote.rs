//! Remote streams published per peer

use std::sync::Arc;

use webrtc::track::track_remote::TrackRemote;

use crate::codec::MediaKind;

/// Inbound track as surfaced by a peer connection
#[derive(Clone)]
pub struct RemoteTrack {
    pub id: String,
    pub stream_id: String,
    pub kind: MediaKind,
    /// Underlying RTP reader; absent for tracks produced without a real
    /// peer connection.
    pub remote: Option<Arc<TrackRemote>>,
}

impl RemoteTrack {
    pub fn new(id: impl Into<String>, stream_id: impl Into<String>, kind: MediaKind) -> Self {
        Self {
            id: id.into(),
            stream_id: stream_id.into(),
            kind,
            remote: None,
        }
    }

    pub fn from_webrtc(track: Arc<TrackRemote>) -> Self {
        Self {
            id: track.id().to_string(),
            stream_id: track.stream_id().to_string(),
            kind: MediaKind::from(track.kind()),
            remote: Some(track),
        }
    }
}

impl std::fmt::Debug for RemoteTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteTrack")
            .field("id", &self.id)
            .field("stream_id", &self.stream_id)
            .field("kind", &self.kind)
            .finish()
    }
}

/// The one stream published for a remote peer
#[derive(Debug, Clone)]
pub struct RemoteStream {
    pub peer_id: String,
    pub stream_id: String,
    pub tracks: Vec<RemoteTrack>,
}

impl RemoteStream {
    pub fn new(peer_id: impl Into<String>, first: RemoteTrack) -> Self {
        Self {
            peer_id: peer_id.into(),
            stream_id: first.stream_id.clone(),
            tracks: vec![first],
        }
    }

    /// Attach a further track of the same stream. Tracks from any other
    /// stream are refused so only the first stream is ever published.
    pub fn attach(&mut self, track: RemoteTrack) -> bool {
        if track.stream_id != self.stream_id || self.tracks.iter().any(|t| t.id == track.id) {
            return false;
        }
        self.tracks.push(track);
        true
    }
}
