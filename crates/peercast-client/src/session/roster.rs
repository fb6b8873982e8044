use peercast_protocol::{InfoUser, ProtocolError};

use crate::state::StatePublisher;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub id: String,
    pub display_name: String,
    pub avatar: Option<String>,
    pub is_local: bool,
}

impl Participant {
    pub fn remote(id: impl Into<String>, display_name: impl Into<String>, avatar: &str) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            avatar: (!avatar.is_empty()).then(|| avatar.to_string()),
            is_local: false,
        }
    }
}

/// Participants of the current room, in first-seen order.
///
/// The local participant is established by the first `info` and is never
/// removed while the session lasts.
pub struct ParticipantRoster {
    participants: Vec<Participant>,
    local_id: Option<String>,
    publisher: StatePublisher,
}

impl ParticipantRoster {
    pub fn new(publisher: StatePublisher) -> Self {
        Self {
            participants: Vec::new(),
            local_id: None,
            publisher,
        }
    }

    /// Replace the roster with the local participant plus the users already
    /// in the room. Returns the ids of earlier entries that are not part of
    /// the new roster. A second call in the same session is rejected and
    /// leaves the roster as it was.
    pub fn apply_info(
        &mut self,
        local_id: &str,
        local_name: &str,
        users: &[InfoUser],
    ) -> Result<Vec<String>, ProtocolError> {
        if self.local_id.is_some() {
            return Err(ProtocolError::DuplicateInfo);
        }

        let mut participants = vec![Participant {
            id: local_id.to_string(),
            display_name: local_name.to_string(),
            avatar: None,
            is_local: true,
        }];

        for user in users {
            if participants.iter().any(|p| p.id == user.id) {
                continue;
            }
            participants.push(Participant::remote(
                user.id.clone(),
                user.name.clone(),
                &user.avatar,
            ));
        }

        let dropped = self
            .participants
            .iter()
            .filter(|old| !participants.iter().any(|p| p.id == old.id))
            .map(|old| old.id.clone())
            .collect();

        self.local_id = Some(local_id.to_string());
        self.participants = participants;

        tracing::info!(
            "Joined room as {} with {} other participants",
            local_id,
            self.participants.len() - 1
        );
        self.publish();
        Ok(dropped)
    }

    /// Add a participant. Returns false if the id is already present.
    pub fn apply_join(&mut self, id: &str, name: &str, avatar: &str) -> bool {
        if self.lookup(id).is_some() {
            tracing::debug!("Participant {} already present", id);
            return false;
        }

        tracing::info!("{} ({}) joined", name, id);
        self.participants.push(Participant::remote(id, name, avatar));
        self.publish();
        true
    }

    /// Remove a remote participant. The local participant stays.
    pub fn apply_leave(&mut self, id: &str) -> Option<Participant> {
        let index = self
            .participants
            .iter()
            .position(|p| p.id == id && !p.is_local)?;

        let participant = self.participants.remove(index);
        tracing::info!("{} ({}) left", participant.display_name, id);
        self.publish();
        Some(participant)
    }

    pub fn lookup(&self, id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == id)
    }

    pub fn local_id(&self) -> Option<&str> {
        self.local_id.as_deref()
    }

    pub fn remote_ids(&self) -> Vec<String> {
        self.participants
            .iter()
            .filter(|p| !p.is_local)
            .map(|p| p.id.clone())
            .collect()
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn clear(&mut self) {
        self.participants.clear();
        self.local_id = None;
        self.publish();
    }

    fn publish(&self) {
        self.publisher.participants(self.participants.clone());
    }
}
