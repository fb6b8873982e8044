//! Peercast command-line client
//!
//! Joins a room and relays stdin lines as chat messages.
//!
//! ```bash
//! peercast --room standup --token "$ROOM_TOKEN"
//! peercast --room standup --token "$ROOM_TOKEN" --endpoint wss://rooms.example.com/api/room/ws
//! ```
//!
//! Commands: `/mic` and `/cam` toggle the local tracks, `/who` lists the
//! room, `/quit` leaves.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use peercast::config::ClientConfig;
use peercast::peer::WebRtcConnector;
use peercast::{ConnectionPhase, SessionOrchestrator};
use peercast_media::SampleTrackSource;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Peercast mesh video-call client
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Room to join
    #[arg(short, long, env = "PEERCAST_ROOM")]
    room: String,

    /// Room token issued by the room service
    #[arg(short, long, env = "PEERCAST_TOKEN")]
    token: String,

    /// Config file (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Signaling endpoint, overrides the config file
    #[arg(long)]
    endpoint: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "peercast=info,peercast_media=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut config =
        ClientConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(endpoint) = args.endpoint {
        config.signaling.endpoint = endpoint;
    }

    let connector = Arc::new(
        WebRtcConnector::new(&config.ice_servers).context("Failed to set up WebRTC")?,
    );
    let mut media = SampleTrackSource::new(config.media.audio, config.media.video);
    if let Some(stream_id) = &config.media.stream_id {
        media = media.with_stream_id(stream_id.clone());
    }

    let session = SessionOrchestrator::spawn(config, connector, Arc::new(media));
    session
        .connect(&args.room, &args.token)
        .await
        .with_context(|| format!("Failed to join room {}", args.room))?;

    tracing::info!("Joined room {}; type to chat, /quit to leave", args.room);
    spawn_chat_log(&session);

    let mut phase = session.state().subscribe_phase();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => {
                    if !handle_line(&session, line.trim()).await {
                        break;
                    }
                }
                None => break,
            },
            changed = phase.changed() => {
                if changed.is_err() || *phase.borrow() == ConnectionPhase::Disconnected {
                    tracing::warn!("Connection to the room was lost");
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
        }
    }

    session.disconnect().await;
    Ok(())
}

/// Returns false when the user asked to leave.
async fn handle_line(session: &SessionOrchestrator, line: &str) -> bool {
    match line {
        "" => {}
        "/quit" => return false,
        "/who" => {
            for participant in session.state().participants() {
                let marker = if participant.is_local { " (you)" } else { "" };
                tracing::info!("{} [{}]{}", participant.display_name, participant.id, marker);
            }
        }
        "/mic" => {
            let enabled = !session.state().local_media().microphone_enabled;
            match session.set_microphone_enabled(enabled).await {
                Ok(true) => tracing::info!("Microphone {}", if enabled { "on" } else { "off" }),
                Ok(false) => tracing::warn!("No microphone track"),
                Err(e) => tracing::warn!("Cannot toggle microphone: {}", e),
            }
        }
        "/cam" => {
            let enabled = !session.state().local_media().camera_enabled;
            match session.set_camera_enabled(enabled).await {
                Ok(true) => tracing::info!("Camera {}", if enabled { "on" } else { "off" }),
                Ok(false) => tracing::warn!("No camera track"),
                Err(e) => tracing::warn!("Cannot toggle camera: {}", e),
            }
        }
        text => {
            if let Err(e) = session.send_chat_message(text).await {
                tracing::warn!("Message not sent: {}", e);
            }
        }
    }

    true
}

/// Log chat as it arrives. Roster changes are logged by the session.
fn spawn_chat_log(session: &SessionOrchestrator) {
    let mut messages = session.state().subscribe_messages();
    tokio::spawn(async move {
        let mut shown = 0;
        while messages.changed().await.is_ok() {
            let entries = messages.borrow_and_update().clone();
            if entries.len() < shown {
                shown = 0;
            }
            for entry in &entries[shown..] {
                tracing::info!("<{}> {}", entry.sender_id, entry.content);
            }
            shown = entries.len();
        }
    });
}
