//! Client configuration
//!
//! Built-in defaults, then an optional TOML file, then `PEERCAST__*`
//! environment overrides (e.g. `PEERCAST__SIGNALING__ENDPOINT`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use peercast_protocol::DataEncoding;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub signaling: SignalingConfig,
    pub ice_servers: Vec<IceServerConfig>,
    pub negotiation: NegotiationConfig,
    pub chat: ChatConfig,
    pub media: MediaConfig,
    pub identity: IdentityConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            signaling: SignalingConfig::default(),
            ice_servers: default_ice_servers(),
            negotiation: NegotiationConfig::default(),
            chat: ChatConfig::default(),
            media: MediaConfig::default(),
            identity: IdentityConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingConfig {
    /// Base WebSocket URL; the room id is appended as a path segment
    pub endpoint: String,
    pub data_encoding: DataEncoding,
    /// Keepalive ping interval, 0 disables pings
    pub ping_interval_secs: u64,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://localhost:8080/api/room/ws".to_string(),
            data_encoding: DataEncoding::String,
            ping_interval_secs: 30,
        }
    }
}

impl SignalingConfig {
    pub fn ping_interval(&self) -> Option<Duration> {
        (self.ping_interval_secs > 0).then(|| Duration::from_secs(self.ping_interval_secs))
    }
}

/// STUN/TURN server entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

impl IceServerConfig {
    pub fn stun(url: &str) -> Self {
        Self {
            urls: vec![url.to_string()],
            username: None,
            credential: None,
        }
    }
}

pub fn default_ice_servers() -> Vec<IceServerConfig> {
    vec![
        IceServerConfig::stun("stun:stun.l.google.com:19302"),
        IceServerConfig::stun("stun:stun1.l.google.com:19302"),
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NegotiationConfig {
    /// Time a peer link may take to reach a stable state, 0 disables the
    /// deadline
    pub timeout_secs: u64,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

impl NegotiationConfig {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ChatConfig {
    /// Drop chat the server echoes back to its sender
    pub suppress_self_echo: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub audio: bool,
    pub video: bool,
    pub stream_id: Option<String>,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
            stream_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Roster display name of the local participant
    pub local_display_name: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            local_display_name: "You".to_string(),
        }
    }
}

impl ClientConfig {
    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("peercast").join("config.toml"))
    }

    /// Load configuration. An explicit `path` must exist; the default
    /// location is only read when present.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        match path {
            Some(path) => {
                builder = builder.add_source(File::from(path).required(true));
            }
            None => {
                if let Some(default) = Self::default_path().filter(|p| p.exists()) {
                    tracing::debug!("Reading config from {:?}", default);
                    builder = builder.add_source(File::from(default).required(false));
                }
            }
        }

        builder
            .add_source(Environment::with_prefix("PEERCAST").separator("__"))
            .build()?
            .try_deserialize()
    }
}
