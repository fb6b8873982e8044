//! Shared protocol definitions for the Peercast control channel.
//!
//! Every control message is a JSON envelope `{type, from?, data}`. The server
//! stamps `from` on everything it forwards; clients never set it.

pub mod error;
pub mod messages;
pub mod types;

pub use error::ProtocolError;
pub use messages::{ClientMessage, ServerEvent, ServerMessage};
pub use types::*;
