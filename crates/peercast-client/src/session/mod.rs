//! Room session: roster, chat log and the control loop tying them to the
//! signaling channel and the peer links.

mod chat;
mod orchestrator;
mod roster;

pub use chat::{ChatEntry, ChatRelay};
pub use orchestrator::SessionOrchestrator;
pub use roster::{Participant, ParticipantRoster};
