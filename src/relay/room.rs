use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tracing::debug;

use super::types::{ChatMessage, ParticipantId, RelayError, RoomId, RoomSummary};

/// Pending outbound messages for one occupant
#[derive(Debug, Default)]
struct Mailbox {
    pending: Vec<ChatMessage>,
    /// Raised on every append and when the mailbox is discarded.
    wake: Arc<Notify>,
}

impl Mailbox {
    fn discard(self) {
        self.wake.notify_one();
    }
}

#[derive(Debug, Default)]
struct RoomState {
    occupants: HashMap<ParticipantId, Mailbox>,
    closed: bool,
}

/// Result of polling a mailbox
#[derive(Debug)]
pub enum Delivery {
    /// Messages taken from the mailbox, in append order
    Mail(Vec<ChatMessage>),
    /// Mailbox was empty; the signal fires on the next append or discard
    Idle(Arc<Notify>),
}

/// A named broadcast domain. One lock guards the occupant map and every
/// mailbox in it.
#[derive(Debug)]
pub struct Room {
    id: RoomId,
    name: String,
    state: Mutex<RoomState>,
}

impl Room {
    pub fn new(id: RoomId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            state: Mutex::new(RoomState::default()),
        }
    }

    pub fn id(&self) -> RoomId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn summary(&self) -> RoomSummary {
        RoomSummary {
            room_id: self.id,
            room_name: self.name.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RoomState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open_state(&self) -> Result<MutexGuard<'_, RoomState>, RelayError> {
        let state = self.lock();
        if state.closed {
            return Err(RelayError::RoomNotFound(self.id));
        }
        Ok(state)
    }

    /// Give the participant a fresh, empty mailbox. Mail pending from an
    /// earlier stay is dropped.
    pub fn enter(&self, participant: ParticipantId) -> Result<(), RelayError> {
        let mut state = self.open_state()?;
        if let Some(previous) = state.occupants.insert(participant, Mailbox::default()) {
            previous.discard();
        }
        Ok(())
    }

    /// Remove the participant's mailbox. Returns whether one existed.
    pub fn exit(&self, participant: ParticipantId) -> bool {
        match self.lock().occupants.remove(&participant) {
            Some(mailbox) => {
                mailbox.discard();
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, participant: ParticipantId) -> bool {
        let state = self.lock();
        !state.closed && state.occupants.contains_key(&participant)
    }

    pub fn occupant_count(&self) -> usize {
        self.lock().occupants.len()
    }

    /// Append `message` to every mailbox except the sender's. Returns the
    /// number of recipients.
    pub fn broadcast(
        &self,
        sender: ParticipantId,
        message: &ChatMessage,
    ) -> Result<usize, RelayError> {
        let mut state = self.open_state()?;
        if !state.occupants.contains_key(&sender) {
            return Err(RelayError::ParticipantNotFound(sender));
        }

        let mut recipients = 0;
        for (id, mailbox) in state.occupants.iter_mut() {
            if *id == sender {
                continue;
            }
            mailbox.pending.push(message.clone());
            mailbox.wake.notify_one();
            recipients += 1;
        }

        debug!(room_id = %self.id, sender = %sender, recipients, "message broadcast");
        Ok(recipients)
    }

    /// Take everything pending for the participant in one step.
    pub fn drain(&self, participant: ParticipantId) -> Result<Vec<ChatMessage>, RelayError> {
        match self.poll_mailbox(participant)? {
            Delivery::Mail(batch) => Ok(batch),
            Delivery::Idle(_) => Ok(Vec::new()),
        }
    }

    /// Drain the mailbox, or hand back its wake signal when there is nothing
    /// to deliver.
    pub fn poll_mailbox(&self, participant: ParticipantId) -> Result<Delivery, RelayError> {
        let mut state = self.open_state()?;
        let mailbox = state
            .occupants
            .get_mut(&participant)
            .ok_or(RelayError::ParticipantNotFound(participant))?;

        if mailbox.pending.is_empty() {
            Ok(Delivery::Idle(Arc::clone(&mailbox.wake)))
        } else {
            Ok(Delivery::Mail(std::mem::take(&mut mailbox.pending)))
        }
    }

    /// Discard every mailbox and refuse further use.
    pub(crate) fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        for (_, mailbox) in state.occupants.drain() {
            mailbox.discard();
        }
    }
}
