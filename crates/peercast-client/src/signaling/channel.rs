use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use peercast_protocol::{ClientMessage, DataEncoding, ServerMessage};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::{Instant, Interval};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use super::{ChannelEvent, ChannelEvents};
use crate::config::SignalingConfig;
use crate::error::ConnectError;

enum Outbound {
    Frame(String),
    Close,
}

/// Handle to the session's control channel.
///
/// Cheap to clone; every clone shares the same open/closed state.
#[derive(Clone)]
pub struct SignalingChannel {
    outbound: mpsc::UnboundedSender<Outbound>,
    open: Arc<AtomicBool>,
    encoding: DataEncoding,
    reader: Option<AbortHandle>,
}

/// Build `<endpoint>/<roomId>?token=<token>`.
pub fn room_url(endpoint: &str, room_id: &str, token: &str) -> Result<String, ConnectError> {
    if !(endpoint.starts_with("ws://") || endpoint.starts_with("wss://")) {
        return Err(ConnectError::InvalidEndpoint(endpoint.to_string()));
    }

    Ok(format!(
        "{}/{}?token={}",
        endpoint.trim_end_matches('/'),
        urlencoding::encode(room_id),
        urlencoding::encode(token)
    ))
}

impl SignalingChannel {
    /// Open the control channel for `room_id`, authenticating with `token`.
    pub async fn open(
        config: &SignalingConfig,
        room_id: &str,
        token: &str,
    ) -> Result<(Self, ChannelEvents), ConnectError> {
        let url = room_url(&config.endpoint, room_id, token)?;

        let (ws_stream, _) = connect_async(url.as_str()).await.map_err(|e| match e {
            WsError::Http(response) => ConnectError::Rejected {
                status: response.status().as_u16(),
            },
            WsError::Url(e) => ConnectError::InvalidEndpoint(e.to_string()),
            other => ConnectError::Unreachable(other),
        })?;

        tracing::info!("Control channel open for room {}", room_id);

        let (mut write, mut read) = ws_stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(true));

        // Outgoing frames and keepalive pings
        let writer_open = open.clone();
        let mut keepalive = config
            .ping_interval()
            .map(|period| tokio::time::interval_at(Instant::now() + period, period));
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    item = rx.recv() => match item {
                        Some(Outbound::Frame(text)) => {
                            if let Err(e) = write.send(Message::Text(text.into())).await {
                                tracing::error!("Failed to send control message: {}", e);
                                break;
                            }
                        }
                        Some(Outbound::Close) | None => {
                            let _ = write.send(Message::Close(None)).await;
                            break;
                        }
                    },
                    _ = next_tick(&mut keepalive) => {
                        if let Err(e) = write.send(Message::Ping(Default::default())).await {
                            tracing::error!("Failed to send keepalive ping: {}", e);
                            break;
                        }
                    }
                }
            }
            writer_open.store(false, Ordering::SeqCst);
        });

        // Incoming frames
        let reader_open = open.clone();
        let reader = tokio::spawn(async move {
            let reason = loop {
                match read.next().await {
                    Some(Ok(Message::Text(text))) => match ServerMessage::parse(text.as_str()) {
                        Ok(message) => {
                            if events_tx.send(ChannelEvent::Message(message)).is_err() {
                                break None;
                            }
                        }
                        Err(e) => {
                            tracing::warn!("Dropping control message: {}", e);
                        }
                    },
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!("Control channel closed by server");
                        break frame.map(|f| f.reason.to_string());
                    }
                    Some(Ok(_)) => {
                        // Ping/pong are answered by tungstenite; binary frames are not part of the protocol
                    }
                    Some(Err(e)) => {
                        tracing::error!("Control channel error: {}", e);
                        break Some(e.to_string());
                    }
                    None => break None,
                }
            };

            reader_open.store(false, Ordering::SeqCst);
            let _ = events_tx.send(ChannelEvent::Closed { reason });
        });

        let channel = Self {
            outbound: tx,
            open,
            encoding: config.data_encoding,
            reader: Some(reader.abort_handle()),
        };

        Ok((channel, events_rx))
    }

    /// A channel whose frames are handed to an in-process receiver instead
    /// of a socket.
    pub fn loopback(encoding: DataEncoding) -> (Self, LoopbackFrames) {
        let (tx, rx) = mpsc::unbounded_channel();
        let channel = Self {
            outbound: tx,
            open: Arc::new(AtomicBool::new(true)),
            encoding,
            reader: None,
        };
        (channel, LoopbackFrames { rx })
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Queue a message for the server. Returns false, after logging, when
    /// the channel is not open; nothing is retried.
    pub fn send(&self, message: &ClientMessage) -> bool {
        if !self.is_open() {
            tracing::warn!(
                "Dropping outbound {} message: control channel is not open",
                message.kind()
            );
            return false;
        }

        let frame = match message.encode(self.encoding) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!("Failed to serialize {} message: {}", message.kind(), e);
                return false;
            }
        };

        if self.outbound.send(Outbound::Frame(frame)).is_err() {
            tracing::warn!("Dropping outbound {} message: writer has stopped", message.kind());
            return false;
        }

        true
    }

    /// Close the channel and release the connection. Idempotent.
    pub fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            let _ = self.outbound.send(Outbound::Close);
            tracing::debug!("Control channel closed");
        }

        if let Some(reader) = &self.reader {
            reader.abort();
        }
    }
}

async fn next_tick(keepalive: &mut Option<Interval>) {
    match keepalive {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Frames written to a loopback channel
pub struct LoopbackFrames {
    rx: mpsc::UnboundedReceiver<Outbound>,
}

impl LoopbackFrames {
    /// Next frame, or `None` once the channel is closed.
    pub async fn next(&mut self) -> Option<String> {
        match self.rx.recv().await? {
            Outbound::Frame(frame) => Some(frame),
            Outbound::Close => None,
        }
    }

    /// Next frame if one is already queued.
    pub fn try_next(&mut self) -> Option<String> {
        match self.rx.try_recv().ok()? {
            Outbound::Frame(frame) => Some(frame),
            Outbound::Close => None,
        }
    }

    /// Drain every queued frame.
    pub fn drain(&mut self) -> Vec<String> {
        std::iter::from_fn(|| self.try_next()).collect()
    }
}
