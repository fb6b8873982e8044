use std::sync::Arc;

use chrono::Utc;
use peercast_media::{LocalMedia, MediaKind, MediaSource};
use peercast_protocol::{EventKind, ProtocolError, ServerEvent, ServerMessage};
use tokio::sync::{mpsc, oneshot};

use super::chat::ChatRelay;
use super::roster::ParticipantRoster;
use crate::config::{ClientConfig, SignalingConfig};
use crate::error::{Result, SessionError};
use crate::peer::{LinkRole, PeerConnectionManager, PeerConnector, PeerEvent, PeerEvents};
use crate::signaling::{ChannelEvent, ChannelEvents, SignalingChannel};
use crate::state::{ConnectionPhase, LocalMediaStatus, SessionState, StatePublisher};

enum Command {
    Connect {
        room_id: String,
        token: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    SendChat {
        text: String,
        reply: oneshot::Sender<Result<()>>,
    },
    SetTrackEnabled {
        kind: MediaKind,
        enabled: bool,
        reply: oneshot::Sender<Result<bool>>,
    },
}

/// Entry point for the surrounding application.
///
/// All session state lives on one control task; this handle only sends it
/// commands. Cloning the handle is cheap. The control task tears the
/// session down once every handle has been dropped.
#[derive(Clone)]
pub struct SessionOrchestrator {
    commands: mpsc::UnboundedSender<Command>,
    state: SessionState,
}

impl SessionOrchestrator {
    /// Start the control task. Must be called from within a tokio runtime.
    pub fn spawn(
        config: ClientConfig,
        connector: Arc<dyn PeerConnector>,
        media_source: Arc<dyn MediaSource>,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (outcomes_tx, outcomes_rx) = mpsc::unbounded_channel();
        let (publisher, state) = StatePublisher::new();

        let controller = Controller {
            chat: ChatRelay::new(publisher.clone()),
            config,
            connector,
            media_source,
            publisher,
            phase: ConnectionPhase::Idle,
            session: None,
            pending: None,
            attempts: 0,
            outcomes: outcomes_tx,
        };
        tokio::spawn(controller.run(commands_rx, outcomes_rx));

        Self {
            commands: commands_tx,
            state,
        }
    }

    /// Join `room_id`. Resolves once local media is acquired and the control
    /// channel is open.
    pub async fn connect(&self, room_id: &str, token: &str) -> Result<()> {
        self.call(|reply| Command::Connect {
            room_id: room_id.to_string(),
            token: token.to_string(),
            reply,
        })
        .await
        .unwrap_or(Err(SessionError::NotConnected))
    }

    /// Leave the room and release every resource. Idempotent.
    pub async fn disconnect(&self) {
        let _ = self.call(|reply| Command::Disconnect { reply }).await;
    }

    pub async fn send_chat_message(&self, text: &str) -> Result<()> {
        self.call(|reply| Command::SendChat {
            text: text.to_string(),
            reply,
        })
        .await
        .unwrap_or(Err(SessionError::NotConnected))
    }

    /// Returns false if there is no local audio track.
    pub async fn set_microphone_enabled(&self, enabled: bool) -> Result<bool> {
        self.set_track_enabled(MediaKind::Audio, enabled).await
    }

    /// Returns false if there is no local video track.
    pub async fn set_camera_enabled(&self, enabled: bool) -> Result<bool> {
        self.set_track_enabled(MediaKind::Video, enabled).await
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    async fn set_track_enabled(&self, kind: MediaKind, enabled: bool) -> Result<bool> {
        self.call(|reply| Command::SetTrackEnabled {
            kind,
            enabled,
            reply,
        })
        .await
        .unwrap_or(Err(SessionError::NotConnected))
    }

    async fn call<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Option<T> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(command(reply)).ok()?;
        rx.await.ok()
    }
}

struct Established {
    channel: SignalingChannel,
    inbound: ChannelEvents,
    media: LocalMedia,
}

struct ConnectOutcome {
    attempt: u64,
    result: Result<Established>,
}

struct PendingConnect {
    attempt: u64,
    reply: oneshot::Sender<Result<()>>,
}

/// One joined room
struct Session {
    channel: SignalingChannel,
    inbound: ChannelEvents,
    roster: ParticipantRoster,
    peers: PeerConnectionManager,
    peer_events: PeerEvents,
    media: LocalMedia,
}

enum SessionEvent {
    Channel(ChannelEvent),
    Peer(PeerEvent),
}

struct Controller {
    config: ClientConfig,
    connector: Arc<dyn PeerConnector>,
    media_source: Arc<dyn MediaSource>,
    publisher: StatePublisher,
    phase: ConnectionPhase,
    session: Option<Session>,
    chat: ChatRelay,
    pending: Option<PendingConnect>,
    attempts: u64,
    outcomes: mpsc::UnboundedSender<ConnectOutcome>,
}

impl Controller {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut outcomes: mpsc::UnboundedReceiver<ConnectOutcome>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(outcome) = outcomes.recv() => self.handle_outcome(outcome),
                event = next_session_event(&mut self.session) => self.handle_session_event(event),
            }
        }

        self.disconnect();
        tracing::debug!("Session controller stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect {
                room_id,
                token,
                reply,
            } => self.connect(room_id, token, reply),
            Command::Disconnect { reply } => {
                self.disconnect();
                let _ = reply.send(());
            }
            Command::SendChat { text, reply } => {
                let _ = reply.send(self.send_chat(&text));
            }
            Command::SetTrackEnabled {
                kind,
                enabled,
                reply,
            } => {
                let _ = reply.send(self.set_track_enabled(kind, enabled));
            }
        }
    }

    fn connect(&mut self, room_id: String, token: String, reply: oneshot::Sender<Result<()>>) {
        if matches!(
            self.phase,
            ConnectionPhase::Connecting | ConnectionPhase::Connected
        ) {
            tracing::warn!("Ignoring connect to {}: session is {:?}", room_id, self.phase);
            let _ = reply.send(Err(SessionError::AlreadyActive));
            return;
        }

        if self.phase == ConnectionPhase::Disconnected {
            // What is left of the lost session
            self.chat.clear();
        }

        self.attempts += 1;
        let attempt = self.attempts;
        self.pending = Some(PendingConnect { attempt, reply });
        self.set_phase(ConnectionPhase::Connecting);

        tracing::info!("Connecting to room {}", room_id);

        let media_source = Arc::clone(&self.media_source);
        let signaling = self.config.signaling.clone();
        let outcomes = self.outcomes.clone();
        tokio::spawn(async move {
            let result = establish(media_source, signaling, room_id, token).await;
            let _ = outcomes.send(ConnectOutcome { attempt, result });
        });
    }

    fn handle_outcome(&mut self, outcome: ConnectOutcome) {
        let pending = match self.pending.take() {
            Some(pending) if pending.attempt == outcome.attempt => pending,
            other => {
                self.pending = other;
                tracing::debug!("Discarding outcome of abandoned connect attempt {}", outcome.attempt);
                if let Ok(established) = outcome.result {
                    established.channel.close();
                    established.media.stop();
                }
                return;
            }
        };

        let established = match outcome.result {
            Ok(established) => established,
            Err(e) => {
                tracing::error!("Connect failed: {}", e);
                self.set_phase(ConnectionPhase::Idle);
                let _ = pending.reply.send(Err(e));
                return;
            }
        };

        let Established {
            channel,
            inbound,
            media,
        } = established;

        let (peers, peer_events) = PeerConnectionManager::new(
            Arc::clone(&self.connector),
            Some(media.clone()),
            channel.clone(),
            self.publisher.clone(),
            self.config.negotiation.timeout(),
        );

        self.session = Some(Session {
            channel,
            inbound,
            roster: ParticipantRoster::new(self.publisher.clone()),
            peers,
            peer_events,
            media,
        });

        self.publish_local_media();
        self.set_phase(ConnectionPhase::Connected);
        let _ = pending.reply.send(Ok(()));
    }

    fn handle_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Channel(ChannelEvent::Message(message)) => self.dispatch(message),
            SessionEvent::Channel(ChannelEvent::Closed { reason }) => {
                tracing::warn!(
                    "Connection lost: {}",
                    reason.as_deref().unwrap_or("control channel closed")
                );
                self.teardown();
                self.set_phase(ConnectionPhase::Disconnected);
            }
            SessionEvent::Peer(event) => {
                if let Some(session) = self.session.as_mut() {
                    session.peers.handle_event(event);
                }
            }
        }
    }

    fn dispatch(&mut self, message: ServerMessage) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        let kind = message.event.kind();
        if let Err(e) = apply(session, &mut self.chat, &self.config, message) {
            tracing::warn!("Dropping {} message: {}", kind, e);
        }
    }

    /// Tear down whatever exists and return to Idle. Aborts a connect in
    /// flight.
    fn disconnect(&mut self) {
        if let Some(pending) = self.pending.take() {
            tracing::info!("Aborting connect attempt {}", pending.attempt);
            let _ = pending.reply.send(Err(SessionError::Aborted));
        }

        if self.phase == ConnectionPhase::Idle && self.session.is_none() {
            return;
        }

        self.teardown();
        self.chat.clear();
        self.set_phase(ConnectionPhase::Idle);
        tracing::info!("Disconnected");
    }

    /// Close links, channel and local media; the chat log is left alone.
    fn teardown(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.peers.close_all();
            session.channel.close();
            session.media.stop();
            session.roster.clear();
        }
        self.publisher.local_media(LocalMediaStatus::default());
    }

    fn send_chat(&mut self, text: &str) -> Result<()> {
        let session = self.session.as_ref().ok_or(SessionError::NotConnected)?;
        self.chat
            .send(&session.channel, session.roster.local_id(), text, Utc::now())?;
        Ok(())
    }

    fn set_track_enabled(&mut self, kind: MediaKind, enabled: bool) -> Result<bool> {
        let session = self.session.as_ref().ok_or(SessionError::NotConnected)?;
        let found = session.media.set_enabled(kind, enabled);
        if found {
            tracing::info!("Local {} {}", kind.as_str(), if enabled { "on" } else { "off" });
            self.publish_local_media();
        }
        Ok(found)
    }

    fn publish_local_media(&self) {
        let status = match &self.session {
            Some(session) => LocalMediaStatus {
                active: true,
                microphone_enabled: session.media.is_enabled(MediaKind::Audio).unwrap_or(false),
                camera_enabled: session.media.is_enabled(MediaKind::Video).unwrap_or(false),
            },
            None => LocalMediaStatus::default(),
        };
        self.publisher.local_media(status);
    }

    fn set_phase(&mut self, phase: ConnectionPhase) {
        self.phase = phase;
        self.publisher.phase(phase);
    }
}

async fn establish(
    media_source: Arc<dyn MediaSource>,
    signaling: SignalingConfig,
    room_id: String,
    token: String,
) -> Result<Established> {
    let media = media_source.acquire().await?;

    match SignalingChannel::open(&signaling, &room_id, &token).await {
        Ok((channel, inbound)) => Ok(Established {
            channel,
            inbound,
            media,
        }),
        Err(e) => {
            media.stop();
            Err(e.into())
        }
    }
}

async fn next_session_event(session: &mut Option<Session>) -> SessionEvent {
    let Some(session) = session else {
        return std::future::pending().await;
    };

    tokio::select! {
        event = session.inbound.recv() => {
            SessionEvent::Channel(event.unwrap_or(ChannelEvent::Closed { reason: None }))
        }
        Some(event) = session.peer_events.recv() => SessionEvent::Peer(event),
    }
}

fn sender(from: &Option<String>, kind: EventKind) -> std::result::Result<&str, ProtocolError> {
    from.as_deref().ok_or(ProtocolError::MissingSender(kind))
}

/// Sender of a peer-to-peer message; must be a remote roster entry.
fn known_peer<'a>(
    session: &Session,
    from: &'a Option<String>,
    kind: EventKind,
) -> std::result::Result<&'a str, ProtocolError> {
    let from = sender(from, kind)?;
    match session.roster.lookup(from) {
        Some(participant) if !participant.is_local => Ok(from),
        _ => Err(ProtocolError::UnknownSender(from.to_string())),
    }
}

fn ensure_initiator(session: &mut Session, peer_id: &str) {
    if let Err(e) = session.peers.ensure_link(peer_id, LinkRole::Initiator) {
        tracing::warn!("Cannot open link to {}: {}", peer_id, e);
    }
}

fn apply(
    session: &mut Session,
    chat: &mut ChatRelay,
    config: &ClientConfig,
    message: ServerMessage,
) -> std::result::Result<(), ProtocolError> {
    let ServerMessage { from, event } = message;

    match event {
        ServerEvent::Info(info) => {
            let local_id = sender(&from, EventKind::Info)?;
            let dropped = session.roster.apply_info(
                local_id,
                &config.identity.local_display_name,
                &info.users,
            )?;
            for peer_id in dropped {
                session.peers.close_link(&peer_id);
            }

            session.peers.set_local_id(local_id);
            for peer_id in session.roster.remote_ids() {
                ensure_initiator(session, &peer_id);
            }
        }
        ServerEvent::Join(join) => {
            let peer_id = sender(&from, EventKind::Join)?;
            if session.roster.local_id() == Some(peer_id) {
                tracing::debug!("Ignoring join for the local participant");
                return Ok(());
            }
            session.roster.apply_join(peer_id, &join.name, &join.avatar);
            ensure_initiator(session, peer_id);
        }
        ServerEvent::Leave => {
            let peer_id = sender(&from, EventKind::Leave)?;
            session.peers.close_link(peer_id);
            session.roster.apply_leave(peer_id);
        }
        ServerEvent::Offer(payload) => {
            let peer_id = known_peer(session, &from, EventKind::Offer)?;
            session.peers.handle_offer(peer_id, payload.content)?;
        }
        ServerEvent::Answer(payload) => {
            let peer_id = known_peer(session, &from, EventKind::Answer)?;
            session.peers.handle_answer(peer_id, payload.content)?;
        }
        ServerEvent::IceCandidate(payload) => {
            let peer_id = known_peer(session, &from, EventKind::IceCandidate)?;
            session.peers.handle_remote_candidate(peer_id, payload.content)?;
        }
        ServerEvent::ChatMessage(message) => {
            let sender_id = sender(&from, EventKind::ChatMessage)?;
            if config.chat.suppress_self_echo && session.roster.local_id() == Some(sender_id) {
                tracing::debug!("Suppressing echo of own chat message");
                return Ok(());
            }
            chat.on_receive(sender_id, message.content, message.ts);
        }
    }

    Ok(())
}
