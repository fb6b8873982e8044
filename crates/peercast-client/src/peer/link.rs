use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use peercast_media::LocalMedia;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::{LinkContext, PeerConnection, PeerConnector, PeerEventKind};
use crate::error::PeerError;

/// Which side of the link sends the first offer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkRole {
    Initiator,
    Responder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    New,
    OfferSent,
    AnswerReceived,
    OfferReceived,
    AnswerSent,
    Stable,
    Closed,
}

/// Snapshot of a link for observers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerLinkInfo {
    pub peer_id: String,
    pub role: LinkRole,
    pub state: NegotiationState,
    pub pending_candidates: usize,
}

/// Operations executed in order against the link's connection
#[derive(Debug)]
pub(crate) enum LinkOp {
    CreateOffer,
    ApplyOffer(String),
    ApplyAnswer(String),
    AddCandidate(String),
}

struct LinkWorker {
    ops: mpsc::UnboundedSender<LinkOp>,
    // Dropping the sender stops the worker, which then closes the connection
    _shutdown: oneshot::Sender<()>,
    deadline: Option<JoinHandle<()>>,
}

impl Drop for LinkWorker {
    fn drop(&mut self) {
        if let Some(deadline) = self.deadline.take() {
            deadline.abort();
        }
    }
}

pub(crate) struct PeerLink {
    peer_id: String,
    epoch: u64,
    role: LinkRole,
    state: NegotiationState,
    remote_description_set: bool,
    pending_remote_candidates: VecDeque<String>,
    local_description_sent: bool,
    // Gathered before our offer/answer went out
    pending_local_candidates: Vec<String>,
    worker: Option<LinkWorker>,
}

impl PeerLink {
    /// Create the link and start its worker. An initiator immediately
    /// queues its offer.
    pub(crate) fn spawn(
        ctx: LinkContext,
        role: LinkRole,
        connector: Arc<dyn PeerConnector>,
        media: LocalMedia,
        negotiation_timeout: Option<Duration>,
    ) -> Self {
        let (ops_tx, ops_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let deadline = negotiation_timeout.map(|timeout| {
            let deadline_ctx = ctx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                deadline_ctx.report(PeerEventKind::DeadlineElapsed);
            })
        });

        let peer_id = ctx.peer_id().to_string();
        let epoch = ctx.epoch;
        tokio::spawn(run_link(connector, media, ctx, ops_rx, shutdown_rx));

        let link = Self {
            peer_id,
            epoch,
            role,
            state: NegotiationState::New,
            remote_description_set: false,
            pending_remote_candidates: VecDeque::new(),
            local_description_sent: false,
            pending_local_candidates: Vec::new(),
            worker: Some(LinkWorker {
                ops: ops_tx,
                _shutdown: shutdown_tx,
                deadline,
            }),
        };

        if role == LinkRole::Initiator {
            link.submit(LinkOp::CreateOffer);
        }

        link
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.epoch
    }

    pub(crate) fn state(&self) -> NegotiationState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: NegotiationState) {
        if self.state != state {
            tracing::debug!("Link {} {:?} -> {:?}", self.peer_id, self.state, state);
            self.state = state;
        }

        if state == NegotiationState::Stable {
            if let Some(deadline) = self.worker.as_mut().and_then(|w| w.deadline.take()) {
                deadline.abort();
            }
        }
    }

    pub(crate) fn remote_description_set(&self) -> bool {
        self.remote_description_set
    }

    pub(crate) fn mark_remote_description_set(&mut self) {
        self.remote_description_set = true;
    }

    pub(crate) fn local_description_sent(&self) -> bool {
        self.local_description_sent
    }

    /// Record that our description went out; returns the local candidates
    /// held back until then.
    pub(crate) fn mark_local_description_sent(&mut self) -> Vec<String> {
        self.local_description_sent = true;
        std::mem::take(&mut self.pending_local_candidates)
    }

    pub(crate) fn hold_local_candidate(&mut self, candidate: String) {
        self.pending_local_candidates.push(candidate);
    }

    pub(crate) fn queue_candidate(&mut self, candidate: String) {
        self.pending_remote_candidates.push_back(candidate);
    }

    pub(crate) fn take_pending(&mut self) -> VecDeque<String> {
        std::mem::take(&mut self.pending_remote_candidates)
    }

    pub(crate) fn restore_pending(&mut self, candidates: VecDeque<String>) {
        self.pending_remote_candidates = candidates;
    }

    /// Queue an operation for the worker. Returns false once the link has
    /// been closed.
    pub(crate) fn submit(&self, op: LinkOp) -> bool {
        match &self.worker {
            Some(worker) => worker.ops.send(op).is_ok(),
            None => false,
        }
    }

    /// Tear the connection down but keep the entry, in state Closed.
    pub(crate) fn fail(&mut self) {
        self.worker = None;
        self.pending_remote_candidates.clear();
        self.pending_local_candidates.clear();
        self.state = NegotiationState::Closed;
    }

    pub(crate) fn info(&self) -> PeerLinkInfo {
        PeerLinkInfo {
            peer_id: self.peer_id.clone(),
            role: self.role,
            state: self.state,
            pending_candidates: self.pending_remote_candidates.len(),
        }
    }
}

async fn run_link(
    connector: Arc<dyn PeerConnector>,
    media: LocalMedia,
    ctx: LinkContext,
    mut ops: mpsc::UnboundedReceiver<LinkOp>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let connection = tokio::select! {
        biased;
        _ = &mut shutdown => return,
        result = connector.connect(&media, ctx.clone()) => match result {
            Ok(connection) => connection,
            Err(e) => {
                tracing::error!("Failed to create peer connection for {}: {}", ctx.peer_id(), e);
                ctx.report(PeerEventKind::Failed(e));
                return;
            }
        },
    };

    loop {
        let op = tokio::select! {
            biased;
            _ = &mut shutdown => break,
            op = ops.recv() => match op {
                Some(op) => op,
                None => break,
            },
        };

        let result = tokio::select! {
            biased;
            _ = &mut shutdown => break,
            result = execute(connection.as_ref(), &ctx, op) => result,
        };

        if let Err(e) = result {
            tracing::warn!("Peer operation for {} failed: {}", ctx.peer_id(), e);
            ctx.report(PeerEventKind::Failed(e));
        }
    }

    if let Err(e) = connection.close().await {
        tracing::debug!("Error closing peer connection for {}: {}", ctx.peer_id(), e);
    }
}

async fn execute(
    connection: &dyn PeerConnection,
    ctx: &LinkContext,
    op: LinkOp,
) -> Result<(), PeerError> {
    match op {
        LinkOp::CreateOffer => {
            let offer = connection.create_offer().await?;
            ctx.report(PeerEventKind::OfferCreated(offer));
        }
        LinkOp::ApplyOffer(offer) => {
            connection.set_remote_description(&offer).await?;
            ctx.report(PeerEventKind::RemoteDescriptionApplied);
            let answer = connection.create_answer().await?;
            ctx.report(PeerEventKind::AnswerCreated(answer));
        }
        LinkOp::ApplyAnswer(answer) => {
            connection.set_remote_description(&answer).await?;
            ctx.report(PeerEventKind::RemoteDescriptionApplied);
        }
        LinkOp::AddCandidate(candidate) => {
            connection.add_ice_candidate(&candidate).await?;
        }
    }

    Ok(())
}
