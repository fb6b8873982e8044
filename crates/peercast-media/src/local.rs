//! Local capture handle
//!
//! A `LocalMedia` is the set of outbound tracks attached to every peer link.
//! Frames are written into the tracks by whatever capture pipeline the
//! embedding application runs; this crate only owns the handles.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use crate::codec::MediaKind;
use crate::error::MediaError;

/// One outbound track plus its enabled flag
#[derive(Clone)]
pub struct LocalTrack {
    kind: MediaKind,
    track: Arc<TrackLocalStaticSample>,
    enabled: Arc<AtomicBool>,
}

impl LocalTrack {
    pub fn new(kind: MediaKind, stream_id: &str) -> Self {
        let track = Arc::new(TrackLocalStaticSample::new(
            kind.capability(),
            kind.as_str().to_string(),
            stream_id.to_string(),
        ));

        Self {
            kind,
            track,
            enabled: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn id(&self) -> &str {
        self.track.id()
    }

    /// Track handle in the form a peer connection accepts
    pub fn track(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        Arc::clone(&self.track) as Arc<dyn TrackLocal + Send + Sync>
    }

    /// Sample writer for the capture pipeline
    pub fn sample_track(&self) -> &Arc<TrackLocalStaticSample> {
        &self.track
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTrack")
            .field("kind", &self.kind)
            .field("id", &self.id())
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

/// Local capture handle (audio and/or video tracks sharing one stream id)
#[derive(Debug, Clone)]
pub struct LocalMedia {
    stream_id: String,
    tracks: Vec<LocalTrack>,
    stopped: Arc<AtomicBool>,
}

impl LocalMedia {
    pub fn new(stream_id: impl Into<String>, tracks: Vec<LocalTrack>) -> Self {
        Self {
            stream_id: stream_id.into(),
            tracks,
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn tracks(&self) -> &[LocalTrack] {
        &self.tracks
    }

    pub fn has(&self, kind: MediaKind) -> bool {
        self.tracks.iter().any(|t| t.kind() == kind)
    }

    /// Enabled flag of the first track of `kind`, `None` if there is none.
    pub fn is_enabled(&self, kind: MediaKind) -> Option<bool> {
        self.tracks
            .iter()
            .find(|t| t.kind() == kind)
            .map(LocalTrack::is_enabled)
    }

    /// Enable or disable every track of `kind`. Returns false if there is none.
    pub fn set_enabled(&self, kind: MediaKind, enabled: bool) -> bool {
        let mut found = false;
        for track in self.tracks.iter().filter(|t| t.kind() == kind) {
            track.set_enabled(enabled);
            found = true;
        }
        found
    }

    /// Stop all tracks. Idempotent; shared by every clone of this handle.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        for track in &self.tracks {
            track.set_enabled(false);
        }

        tracing::debug!("Stopped local media stream {}", self.stream_id);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// Media collaborator: produces the local capture handle for a session
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn acquire(&self) -> Result<LocalMedia, MediaError>;
}

/// Media source that hands out sample-fed tracks.
///
/// No capture device is opened; the application writes encoded samples into
/// the tracks itself.
#[derive(Debug, Clone)]
pub struct SampleTrackSource {
    audio: bool,
    video: bool,
    stream_id: Option<String>,
}

impl SampleTrackSource {
    pub fn new(audio: bool, video: bool) -> Self {
        Self {
            audio,
            video,
            stream_id: None,
        }
    }

    pub fn with_stream_id(mut self, stream_id: impl Into<String>) -> Self {
        self.stream_id = Some(stream_id.into());
        self
    }
}

impl Default for SampleTrackSource {
    fn default() -> Self {
        Self::new(true, true)
    }
}

#[async_trait]
impl MediaSource for SampleTrackSource {
    async fn acquire(&self) -> Result<LocalMedia, MediaError> {
        if !self.audio && !self.video {
            return Err(MediaError::NoDevices);
        }

        let stream_id = self
            .stream_id
            .clone()
            .unwrap_or_else(|| format!("peercast-{}", uuid::Uuid::new_v4()));

        let mut tracks = Vec::new();
        if self.audio {
            tracks.push(LocalTrack::new(MediaKind::Audio, &stream_id));
        }
        if self.video {
            tracks.push(LocalTrack::new(MediaKind::Video, &stream_id));
        }

        tracing::info!("Acquired local media {} ({} tracks)", stream_id, tracks.len());
        Ok(LocalMedia::new(stream_id, tracks))
    }
}
