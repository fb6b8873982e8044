//! Peer connections backed by webrtc-rs

use std::sync::Arc;

use async_trait::async_trait;
use peercast_media::{LocalMedia, RemoteTrack};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use super::{LinkContext, PeerConnection, PeerConnector};
use crate::config::IceServerConfig;
use crate::error::PeerError;

/// Creates one `RTCPeerConnection` per link from a shared API instance
pub struct WebRtcConnector {
    api: Arc<API>,
    ice_servers: Vec<RTCIceServer>,
}

impl WebRtcConnector {
    pub fn new(ice_servers: &[IceServerConfig]) -> Result<Self, PeerError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers = ice_servers
            .iter()
            .map(|server| RTCIceServer {
                urls: server.urls.clone(),
                username: server.username.clone().unwrap_or_default(),
                credential: server.credential.clone().unwrap_or_default(),
                ..Default::default()
            })
            .collect();

        Ok(Self {
            api: Arc::new(api),
            ice_servers,
        })
    }
}

#[async_trait]
impl PeerConnector for WebRtcConnector {
    async fn connect(
        &self,
        media: &LocalMedia,
        ctx: LinkContext,
    ) -> Result<Arc<dyn PeerConnection>, PeerError> {
        let config = RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ..Default::default()
        };

        let peer_connection = Arc::new(self.api.new_peer_connection(config).await?);

        for track in media.tracks() {
            peer_connection.add_track(track.track()).await?;
        }

        let candidate_ctx = ctx.clone();
        peer_connection.on_ice_candidate(Box::new(move |candidate| {
            let ctx = candidate_ctx.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    return;
                };
                match candidate.to_json().map_err(PeerError::from).and_then(|init| {
                    serde_json::to_string(&init).map_err(PeerError::from)
                }) {
                    Ok(json) => ctx.candidate_discovered(json),
                    Err(e) => tracing::warn!("Failed to serialize ICE candidate: {}", e),
                }
            })
        }));

        let track_ctx = ctx.clone();
        peer_connection.on_track(Box::new(move |track, _receiver, _transceiver| {
            tracing::debug!(
                "Remote track {} ({:?}) from {}",
                track.id(),
                track.kind(),
                track_ctx.peer_id()
            );
            let ctx = track_ctx.clone();
            Box::pin(async move {
                ctx.track_received(RemoteTrack::from_webrtc(track));
            })
        }));

        let state_ctx = ctx;
        peer_connection.on_peer_connection_state_change(Box::new(
            move |state: RTCPeerConnectionState| {
                tracing::debug!("Peer connection to {} is {}", state_ctx.peer_id(), state);
                if state == RTCPeerConnectionState::Failed {
                    state_ctx.connection_failed("peer connection failed");
                }
                Box::pin(async {})
            },
        ));

        Ok(Arc::new(WebRtcPeer { peer_connection }))
    }
}

struct WebRtcPeer {
    peer_connection: Arc<RTCPeerConnection>,
}

impl WebRtcPeer {
    async fn local_description(&self) -> Result<String, PeerError> {
        let description = self
            .peer_connection
            .local_description()
            .await
            .ok_or_else(|| PeerError::InvalidState("no local description".to_string()))?;

        Ok(serde_json::to_string(&description)?)
    }
}

#[async_trait]
impl PeerConnection for WebRtcPeer {
    async fn create_offer(&self) -> Result<String, PeerError> {
        let offer = self.peer_connection.create_offer(None).await?;
        self.peer_connection.set_local_description(offer).await?;
        self.local_description().await
    }

    async fn create_answer(&self) -> Result<String, PeerError> {
        let answer = self.peer_connection.create_answer(None).await?;
        self.peer_connection.set_local_description(answer).await?;
        self.local_description().await
    }

    async fn set_remote_description(&self, description: &str) -> Result<(), PeerError> {
        let received: RTCSessionDescription = serde_json::from_str(description)?;

        let description = match received.sdp_type {
            RTCSdpType::Offer => RTCSessionDescription::offer(received.sdp)?,
            RTCSdpType::Answer => RTCSessionDescription::answer(received.sdp)?,
            RTCSdpType::Pranswer => RTCSessionDescription::pranswer(received.sdp)?,
            other => {
                return Err(PeerError::Negotiation(format!(
                    "unsupported session description type {}",
                    other
                )));
            }
        };

        self.peer_connection.set_remote_description(description).await?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: &str) -> Result<(), PeerError> {
        let candidate: RTCIceCandidateInit = serde_json::from_str(candidate)?;
        self.peer_connection.add_ice_candidate(candidate).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), PeerError> {
        self.peer_connection.close().await?;
        Ok(())
    }
}
