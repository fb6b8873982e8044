//! Shared fixtures: a fake signaling server on loopback TCP, and fake peer
//! connection / media collaborators that record what the session does.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use peercast::peer::{LinkContext, PeerConnection, PeerConnector};
use peercast::PeerError;
use peercast_media::{LocalMedia, MediaError, MediaSource, RemoteTrack, SampleTrackSource};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, watch, Notify};
use tokio::time::timeout;

pub const VALID_TOKEN: &str = "valid-token";
pub const WAIT: Duration = Duration::from_secs(5);

/// Wait until the watched value satisfies `pred`, failing the test after
/// a few seconds.
pub async fn wait_for<T: Clone>(mut rx: watch::Receiver<T>, pred: impl FnMut(&T) -> bool) -> T {
    let value = timeout(WAIT, rx.wait_for(pred))
        .await
        .expect("timed out waiting for state")
        .expect("state publisher dropped")
        .clone();
    value
}

/// Poll `check` until it holds.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

// ============================================================================
// Signaling server
// ============================================================================

#[derive(Clone)]
struct ServerState {
    connections: mpsc::UnboundedSender<ServerConn>,
}

/// Accepts room connections on `/api/room/ws/{room_id}?token=...`
pub struct FakeSignalingServer {
    addr: SocketAddr,
    connections: mpsc::UnboundedReceiver<ServerConn>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl FakeSignalingServer {
    pub async fn start() -> Self {
        let (connections_tx, connections) = mpsc::unbounded_channel();
        let state = ServerState {
            connections: connections_tx,
        };

        let router = Router::new()
            .route("/api/room/ws/{room_id}", get(room_ws))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("local addr");

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .ok();
        });

        Self {
            addr,
            connections,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    pub fn endpoint(&self) -> String {
        format!("ws://{}/api/room/ws", self.addr)
    }

    /// Next client connection.
    pub async fn accept(&mut self) -> ServerConn {
        timeout(WAIT, self.connections.recv())
            .await
            .expect("no client connected")
            .expect("server stopped")
    }

    /// A connection accepted within `wait`, if any.
    pub async fn try_accept(&mut self, wait: Duration) -> Option<ServerConn> {
        timeout(wait, self.connections.recv()).await.ok().flatten()
    }
}

impl Drop for FakeSignalingServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

async fn room_ws(
    ws: WebSocketUpgrade,
    Path(room_id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    State(state): State<ServerState>,
) -> Response {
    if query.get("token").map(String::as_str) != Some(VALID_TOKEN) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(socket, room_id, state))
}

async fn handle_socket(socket: WebSocket, room_id: String, state: ServerState) {
    let (outgoing_tx, mut outgoing) = mpsc::unbounded_channel::<Message>();
    let (incoming_tx, incoming) = mpsc::unbounded_channel::<String>();
    let closed = Arc::new(AtomicBool::new(false));

    let _ = state.connections.send(ServerConn {
        room_id,
        outgoing: outgoing_tx,
        incoming,
        closed: closed.clone(),
    });

    let (mut sink, mut stream) = socket.split();
    loop {
        tokio::select! {
            message = outgoing.recv() => match message {
                Some(message) => {
                    let is_close = matches!(message, Message::Close(_));
                    if sink.send(message).await.is_err() || is_close {
                        break;
                    }
                }
                None => break,
            },
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let _ = incoming_tx.send(text.as_str().to_string());
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    closed.store(true, Ordering::SeqCst);
}

/// Server side of one client connection
pub struct ServerConn {
    pub room_id: String,
    outgoing: mpsc::UnboundedSender<Message>,
    incoming: mpsc::UnboundedReceiver<String>,
    closed: Arc<AtomicBool>,
}

impl ServerConn {
    pub fn send_raw(&self, text: &str) {
        let _ = self.outgoing.send(Message::Text(text.to_string().into()));
    }

    /// Send a server-stamped message with object data.
    pub fn send(&self, kind: &str, from: &str, data: Value) {
        self.send_raw(&json!({ "type": kind, "from": from, "data": data }).to_string());
    }

    /// Send a relayed message whose data is a JSON-encoded string, the way
    /// the server forwards client payloads.
    pub fn relay(&self, kind: &str, from: &str, data: Value) {
        self.send_raw(&json!({ "type": kind, "from": from, "data": data.to_string() }).to_string());
    }

    pub fn info(&self, local_id: &str, users: &[(&str, &str)]) {
        let users: Vec<Value> = users
            .iter()
            .map(|(id, name)| json!({ "inner_id": id, "name": name, "avatar": "" }))
            .collect();
        self.send("info", local_id, json!({ "users": users }));
    }

    pub fn join(&self, peer_id: &str, name: &str) {
        self.send("join", peer_id, json!({ "name": name, "avatar": "" }));
    }

    pub fn leave(&self, peer_id: &str) {
        self.send("leave", peer_id, json!({}));
    }

    pub fn offer(&self, from: &str, to: &str, content: &str) {
        self.relay("offer", from, json!({ "to": to, "content": content }));
    }

    pub fn answer(&self, from: &str, to: &str, content: &str) {
        self.relay("answer", from, json!({ "to": to, "content": content }));
    }

    pub fn candidate(&self, from: &str, to: &str, content: &str) {
        self.relay("ice-candidate", from, json!({ "to": to, "content": content }));
    }

    pub fn close(&self) {
        let _ = self.outgoing.send(Message::Close(None));
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Next frame from the client, as sent.
    pub async fn recv_text(&mut self) -> String {
        timeout(WAIT, self.incoming.recv())
            .await
            .expect("no frame from client")
            .expect("client connection ended")
    }

    /// Next frame from the client with `data` decoded to an object.
    pub async fn recv(&mut self) -> Value {
        let text = self.recv_text().await;
        decode_frame(&text)
    }

    /// Next frame of `kind`, skipping others.
    pub async fn recv_kind(&mut self, kind: &str) -> Value {
        loop {
            let frame = self.recv().await;
            if frame["type"] == kind {
                return frame;
            }
        }
    }

    /// Frames received within `wait`.
    pub async fn drain(&mut self, wait: Duration) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(Some(text)) = timeout(wait, self.incoming.recv()).await {
            frames.push(decode_frame(&text));
        }
        frames
    }
}

pub fn decode_frame(text: &str) -> Value {
    let mut frame: Value = serde_json::from_str(text).expect("client frame is JSON");
    if let Some(data) = frame["data"].as_str() {
        frame["data"] = serde_json::from_str(data).expect("string data is JSON");
    }
    frame
}

// ============================================================================
// Peer connections
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Connect(String),
    CreateOffer(String),
    CreateAnswer(String),
    SetRemote(String, String),
    AddCandidate(String, String),
    Close(String),
}

#[derive(Default)]
struct ConnectorShared {
    calls: Mutex<Vec<Call>>,
    invalid_state_errors: Mutex<Vec<String>>,
    contexts: Mutex<HashMap<String, LinkContext>>,
}

/// Records every negotiation step. Offers and answers are
/// `offer-for-<peer>` / `answer-for-<peer>`; each one is followed by a
/// local candidate `cand-<peer>`. A remote description of `bad-sdp` fails.
#[derive(Clone, Default)]
pub struct FakeConnector {
    shared: Arc<ConnectorShared>,
    offer_gate: Option<Arc<Notify>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offers block until the returned gate is notified.
    pub fn with_offer_gate(mut self) -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        self.offer_gate = Some(gate.clone());
        (self, gate)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.shared.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, peer_id: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| call_peer(call) == peer_id)
            .collect()
    }

    pub fn invalid_state_errors(&self) -> Vec<String> {
        self.shared.invalid_state_errors.lock().unwrap().clone()
    }

    /// Deliver a remote track on the latest link to `peer_id`.
    pub fn emit_track(&self, peer_id: &str, track: RemoteTrack) {
        let contexts = self.shared.contexts.lock().unwrap();
        contexts
            .get(peer_id)
            .expect("no link to peer")
            .track_received(track);
    }

    /// Report a transport failure on the latest link to `peer_id`.
    pub fn fail_connection(&self, peer_id: &str) {
        let contexts = self.shared.contexts.lock().unwrap();
        contexts
            .get(peer_id)
            .expect("no link to peer")
            .connection_failed("ice failed");
    }
}

fn call_peer(call: &Call) -> &str {
    match call {
        Call::Connect(peer)
        | Call::CreateOffer(peer)
        | Call::CreateAnswer(peer)
        | Call::SetRemote(peer, _)
        | Call::AddCandidate(peer, _)
        | Call::Close(peer) => peer,
    }
}

#[async_trait]
impl PeerConnector for FakeConnector {
    async fn connect(
        &self,
        _media: &LocalMedia,
        ctx: LinkContext,
    ) -> Result<Arc<dyn PeerConnection>, PeerError> {
        let peer_id = ctx.peer_id().to_string();
        self.shared.calls.lock().unwrap().push(Call::Connect(peer_id.clone()));
        self.shared
            .contexts
            .lock()
            .unwrap()
            .insert(peer_id.clone(), ctx.clone());

        Ok(Arc::new(FakePeer {
            peer_id,
            ctx,
            shared: self.shared.clone(),
            offer_gate: self.offer_gate.clone(),
            remote_set: AtomicBool::new(false),
        }))
    }
}

struct FakePeer {
    peer_id: String,
    ctx: LinkContext,
    shared: Arc<ConnectorShared>,
    offer_gate: Option<Arc<Notify>>,
    remote_set: AtomicBool,
}

impl FakePeer {
    fn record(&self, call: Call) {
        self.shared.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl PeerConnection for FakePeer {
    async fn create_offer(&self) -> Result<String, PeerError> {
        if let Some(gate) = &self.offer_gate {
            gate.notified().await;
        }
        self.record(Call::CreateOffer(self.peer_id.clone()));
        self.ctx.candidate_discovered(format!("cand-{}", self.peer_id));
        Ok(format!("offer-for-{}", self.peer_id))
    }

    async fn create_answer(&self) -> Result<String, PeerError> {
        self.record(Call::CreateAnswer(self.peer_id.clone()));
        self.ctx.candidate_discovered(format!("cand-{}", self.peer_id));
        Ok(format!("answer-for-{}", self.peer_id))
    }

    async fn set_remote_description(&self, description: &str) -> Result<(), PeerError> {
        if description == "bad-sdp" {
            return Err(PeerError::Negotiation("unparsable description".into()));
        }
        self.record(Call::SetRemote(self.peer_id.clone(), description.to_string()));
        self.remote_set.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: &str) -> Result<(), PeerError> {
        if !self.remote_set.load(Ordering::SeqCst) {
            self.shared
                .invalid_state_errors
                .lock()
                .unwrap()
                .push(candidate.to_string());
            return Err(PeerError::InvalidState("no remote description".into()));
        }
        self.record(Call::AddCandidate(self.peer_id.clone(), candidate.to_string()));
        Ok(())
    }

    async fn close(&self) -> Result<(), PeerError> {
        self.record(Call::Close(self.peer_id.clone()));
        Ok(())
    }
}

// ============================================================================
// Media
// ============================================================================

/// Media source that can refuse access and remembers what it handed out
#[derive(Clone, Default)]
pub struct FakeMedia {
    deny: bool,
    gate: Option<Arc<Notify>>,
    acquired: Arc<Mutex<Vec<LocalMedia>>>,
}

impl FakeMedia {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn denied() -> Self {
        Self {
            deny: true,
            ..Self::default()
        }
    }

    /// Acquisition blocks until the returned gate is notified.
    pub fn gated() -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        let media = Self {
            gate: Some(gate.clone()),
            ..Self::default()
        };
        (media, gate)
    }

    pub fn acquired(&self) -> Vec<LocalMedia> {
        self.acquired.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaSource for FakeMedia {
    async fn acquire(&self) -> Result<LocalMedia, MediaError> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.deny {
            return Err(MediaError::PermissionDenied);
        }

        let media = SampleTrackSource::default()
            .with_stream_id("local")
            .acquire()
            .await?;
        self.acquired.lock().unwrap().push(media.clone());
        Ok(media)
    }
}
