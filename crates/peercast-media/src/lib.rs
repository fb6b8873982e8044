//! Media handles for Peercast
//!
//! The session core never looks inside media. This crate provides:
//! - The local capture handle attached to every peer link
//! - The media source seam used to acquire it
//! - Remote streams published per peer

pub mod codec;
pub mod error;
pub mod local;
pub mod remote;

pub use codec::MediaKind;
pub use error::MediaError;
pub use local::{LocalMedia, LocalTrack, MediaSource, SampleTrackSource};
pub use remote::{RemoteStream, RemoteTrack};
