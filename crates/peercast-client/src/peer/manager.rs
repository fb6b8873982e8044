use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use peercast_media::{LocalMedia, RemoteStream, RemoteTrack};
use peercast_protocol::{ClientMessage, EventKind, ProtocolError};
use tokio::sync::mpsc;

use super::link::{LinkOp, PeerLink};
use super::{
    LinkContext, LinkRole, NegotiationState, PeerConnector, PeerEvent, PeerEventKind, PeerEvents,
    PeerLinkInfo,
};
use crate::error::PeerError;
use crate::signaling::SignalingChannel;
use crate::state::StatePublisher;

/// Owns one [`PeerLink`] per remote participant and drives offer/answer
/// and candidate exchange for each of them.
///
/// Not thread-safe on its own: every method is called from the session's
/// control loop, which also feeds back the [`PeerEvent`]s produced by the
/// link workers.
pub struct PeerConnectionManager {
    connector: Arc<dyn PeerConnector>,
    media: Option<LocalMedia>,
    channel: SignalingChannel,
    publisher: StatePublisher,
    local_id: Option<String>,
    links: BTreeMap<String, PeerLink>,
    streams: BTreeMap<String, RemoteStream>,
    events: mpsc::UnboundedSender<PeerEvent>,
    next_epoch: u64,
    negotiation_timeout: Option<Duration>,
}

impl PeerConnectionManager {
    pub fn new(
        connector: Arc<dyn PeerConnector>,
        media: Option<LocalMedia>,
        channel: SignalingChannel,
        publisher: StatePublisher,
        negotiation_timeout: Option<Duration>,
    ) -> (Self, PeerEvents) {
        let (events, events_rx) = mpsc::unbounded_channel();

        let manager = Self {
            connector,
            media,
            channel,
            publisher,
            local_id: None,
            links: BTreeMap::new(),
            streams: BTreeMap::new(),
            events,
            next_epoch: 0,
            negotiation_timeout,
        };

        (manager, events_rx)
    }

    /// Identity used to break offer collisions
    pub fn set_local_id(&mut self, local_id: impl Into<String>) {
        self.local_id = Some(local_id.into());
    }

    /// Return the link to `peer_id`, creating it if needed. A new initiator
    /// link sends its offer as soon as it has been created.
    pub fn ensure_link(&mut self, peer_id: &str, role: LinkRole) -> Result<PeerLinkInfo, PeerError> {
        if let Some(link) = self.links.get(peer_id) {
            return Ok(link.info());
        }

        let info = self.create_link(peer_id, role, VecDeque::new())?.info();
        self.publish_links();
        Ok(info)
    }

    pub fn handle_offer(&mut self, from: &str, offer: String) -> Result<(), ProtocolError> {
        let carried = match self.links.get(from).map(PeerLink::state) {
            None | Some(NegotiationState::Closed) => VecDeque::new(),
            Some(NegotiationState::New) | Some(NegotiationState::OfferSent) => {
                if !self.is_polite_towards(from) {
                    tracing::debug!("Ignoring colliding offer from {}", from);
                    return Ok(());
                }

                tracing::info!("Offer collision with {}, answering theirs", from);
                self.links
                    .get_mut(from)
                    .map(PeerLink::take_pending)
                    .unwrap_or_default()
            }
            Some(NegotiationState::Stable) => {
                if let Some(link) = self.links.get_mut(from) {
                    tracing::debug!("Renegotiating link to {}", from);
                    link.set_state(NegotiationState::OfferReceived);
                    link.submit(LinkOp::ApplyOffer(offer));
                }
                self.publish_links();
                return Ok(());
            }
            Some(state) => {
                return Err(ProtocolError::OutOfSequence {
                    kind: EventKind::Offer,
                    from: from.to_string(),
                    state: format!("{:?}", state),
                });
            }
        };

        match self.create_link(from, LinkRole::Responder, carried) {
            Ok(link) => {
                link.set_state(NegotiationState::OfferReceived);
                link.submit(LinkOp::ApplyOffer(offer));
            }
            Err(e) => {
                tracing::warn!("Cannot answer offer from {}: {}", from, e);
                return Ok(());
            }
        }

        self.publish_links();
        Ok(())
    }

    pub fn handle_answer(&mut self, from: &str, answer: String) -> Result<(), ProtocolError> {
        let state = self.links.get(from).map(PeerLink::state);

        match (self.links.get_mut(from), state) {
            (Some(link), Some(NegotiationState::OfferSent)) => {
                link.set_state(NegotiationState::AnswerReceived);
                link.submit(LinkOp::ApplyAnswer(answer));
            }
            (Some(_), Some(NegotiationState::Closed)) => {
                tracing::debug!("Dropping answer for closed link to {}", from);
                return Ok(());
            }
            (_, state) => {
                return Err(ProtocolError::OutOfSequence {
                    kind: EventKind::Answer,
                    from: from.to_string(),
                    state: state.map_or_else(|| "no link".to_string(), |s| format!("{:?}", s)),
                });
            }
        }

        self.publish_links();
        Ok(())
    }

    /// Apply a remote candidate, or hold it until the remote description
    /// is in place.
    pub fn handle_remote_candidate(&mut self, from: &str, candidate: String) -> Result<(), ProtocolError> {
        let Some(link) = self.links.get_mut(from) else {
            return Err(ProtocolError::OutOfSequence {
                kind: EventKind::IceCandidate,
                from: from.to_string(),
                state: "no link".to_string(),
            });
        };

        if link.state() == NegotiationState::Closed {
            tracing::debug!("Dropping candidate for closed link to {}", from);
            return Ok(());
        }

        if link.remote_description_set() {
            link.submit(LinkOp::AddCandidate(candidate));
        } else {
            link.queue_candidate(candidate);
            self.publish_links();
        }

        Ok(())
    }

    /// Apply the result of work done on a link's worker.
    pub fn handle_event(&mut self, event: PeerEvent) {
        let PeerEvent { peer_id, epoch, kind } = event;

        let Some(link) = self
            .links
            .get_mut(&peer_id)
            .filter(|link| link.epoch() == epoch && link.state() != NegotiationState::Closed)
        else {
            tracing::debug!("Discarding stale link event for {}", peer_id);
            return;
        };

        match kind {
            PeerEventKind::OfferCreated(offer) => {
                if link.state() != NegotiationState::New {
                    tracing::debug!("Discarding offer for {} in state {:?}", peer_id, link.state());
                    return;
                }
                self.channel.send(&ClientMessage::Offer {
                    to: peer_id.clone(),
                    content: offer,
                });
                link.set_state(NegotiationState::OfferSent);
                for candidate in link.mark_local_description_sent() {
                    send_candidate(&self.channel, &peer_id, candidate);
                }
            }
            PeerEventKind::RemoteDescriptionApplied => {
                link.mark_remote_description_set();
                for candidate in link.take_pending() {
                    link.submit(LinkOp::AddCandidate(candidate));
                }
                if link.state() == NegotiationState::AnswerReceived {
                    link.set_state(NegotiationState::Stable);
                    tracing::info!("Link to {} established", peer_id);
                }
            }
            PeerEventKind::AnswerCreated(answer) => {
                self.channel.send(&ClientMessage::Answer {
                    to: peer_id.clone(),
                    content: answer,
                });
                link.set_state(NegotiationState::AnswerSent);
                for candidate in link.mark_local_description_sent() {
                    send_candidate(&self.channel, &peer_id, candidate);
                }
                link.set_state(NegotiationState::Stable);
                tracing::info!("Link to {} established", peer_id);
            }
            PeerEventKind::CandidateDiscovered(candidate) => {
                if link.local_description_sent() {
                    send_candidate(&self.channel, &peer_id, candidate);
                } else {
                    link.hold_local_candidate(candidate);
                }
                return;
            }
            PeerEventKind::TrackReceived(track) => {
                self.publish_track(&peer_id, track);
                return;
            }
            PeerEventKind::Failed(e) => {
                self.fail_link(&peer_id, &e);
            }
            PeerEventKind::DeadlineElapsed => {
                if link.state() != NegotiationState::Stable {
                    self.fail_link(&peer_id, &PeerError::Timeout);
                }
            }
        }

        self.publish_links();
    }

    /// Close and forget the link to `peer_id`. Returns false if there was
    /// none.
    pub fn close_link(&mut self, peer_id: &str) -> bool {
        let removed = self.links.remove(peer_id).is_some();
        if self.streams.remove(peer_id).is_some() {
            self.publish_streams();
        }
        if removed {
            tracing::info!("Closed link to {}", peer_id);
            self.publish_links();
        }
        removed
    }

    pub fn close_all(&mut self) {
        if !self.links.is_empty() {
            tracing::info!("Closing {} peer links", self.links.len());
        }
        self.links.clear();
        self.streams.clear();
        self.publish_links();
        self.publish_streams();
    }

    pub fn link(&self, peer_id: &str) -> Option<PeerLinkInfo> {
        self.links.get(peer_id).map(PeerLink::info)
    }

    pub fn links(&self) -> Vec<PeerLinkInfo> {
        self.links.values().map(PeerLink::info).collect()
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    pub fn remote_stream(&self, peer_id: &str) -> Option<&RemoteStream> {
        self.streams.get(peer_id)
    }

    pub fn remote_streams(&self) -> Vec<RemoteStream> {
        self.streams.values().cloned().collect()
    }

    fn create_link(
        &mut self,
        peer_id: &str,
        role: LinkRole,
        pending: VecDeque<String>,
    ) -> Result<&mut PeerLink, PeerError> {
        let media = self.media.clone().ok_or(PeerError::MediaUnavailable)?;

        self.next_epoch += 1;
        let ctx = LinkContext::new(peer_id, self.next_epoch, self.events.clone());
        let mut link = PeerLink::spawn(
            ctx,
            role,
            Arc::clone(&self.connector),
            media,
            self.negotiation_timeout,
        );
        link.restore_pending(pending);

        tracing::info!("Opening {:?} link to {}", role, peer_id);

        // Replacing an entry drops the previous link's worker
        Ok(match self.links.entry(peer_id.to_string()) {
            Entry::Occupied(mut entry) => {
                entry.insert(link);
                entry.into_mut()
            }
            Entry::Vacant(entry) => entry.insert(link),
        })
    }

    fn fail_link(&mut self, peer_id: &str, error: &PeerError) {
        tracing::warn!("Link to {} failed: {}", peer_id, error);

        if let Some(link) = self.links.get_mut(peer_id) {
            link.fail();
        }
        if self.streams.remove(peer_id).is_some() {
            self.publish_streams();
        }
    }

    fn publish_track(&mut self, peer_id: &str, track: RemoteTrack) {
        match self.streams.entry(peer_id.to_string()) {
            Entry::Vacant(entry) => {
                tracing::info!("Remote stream {} from {}", track.stream_id, peer_id);
                entry.insert(RemoteStream::new(peer_id, track));
            }
            Entry::Occupied(mut entry) => {
                if !entry.get_mut().attach(track) {
                    tracing::debug!("Ignoring extra remote track from {}", peer_id);
                    return;
                }
            }
        }

        self.publish_streams();
    }

    fn is_polite_towards(&self, peer_id: &str) -> bool {
        self.local_id
            .as_deref()
            .map_or(true, |local_id| local_id < peer_id)
    }

    fn publish_links(&self) {
        self.publisher.peer_links(self.links());
    }

    fn publish_streams(&self) {
        self.publisher.remote_streams(self.remote_streams());
    }
}

fn send_candidate(channel: &SignalingChannel, peer_id: &str, candidate: String) {
    channel.send(&ClientMessage::IceCandidate {
        to: peer_id.to_string(),
        content: candidate,
    });
}
