use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::sync::{mpsc, oneshot};
use tracing::info;

use super::alloc::allocate;
use super::room::Room;
use super::types::{ParticipantId, RelayError, RoomId, RoomSummary};

/// Capacity of the registry command queue
const REGISTRY_QUEUE: usize = 1024;

/// Process-wide set of logged-in participants and live rooms.
#[derive(Debug)]
pub struct Registry {
    participants: HashSet<ParticipantId>,
    rooms: HashMap<RoomId, Arc<Room>>,
    rng: StdRng,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_rng(&mut rand::rng()))
    }

    /// Registry drawing ids from a fixed seed
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            participants: HashSet::new(),
            rooms: HashMap::new(),
            rng,
        }
    }

    pub fn login(&mut self) -> Result<ParticipantId, RelayError> {
        let participants = &self.participants;
        let id = allocate(&mut self.rng, ParticipantId::KIND, |id| {
            participants.contains(id)
        })?;
        self.participants.insert(id);
        Ok(id)
    }

    /// Returns whether the participant was logged in.
    pub fn logout(&mut self, participant: ParticipantId) -> bool {
        self.participants.remove(&participant)
    }

    pub fn is_active(&self, participant: ParticipantId) -> bool {
        self.participants.contains(&participant)
    }

    pub fn create_room(&mut self, name: impl Into<String>) -> Result<Arc<Room>, RelayError> {
        let rooms = &self.rooms;
        let id = allocate(&mut self.rng, RoomId::KIND, |id| rooms.contains_key(id))?;
        let room = Arc::new(Room::new(id, name));
        self.rooms.insert(id, Arc::clone(&room));
        Ok(room)
    }

    /// Delete the room and discard its mailboxes. Returns whether it existed.
    pub fn remove_room(&mut self, room_id: RoomId) -> bool {
        match self.rooms.remove(&room_id) {
            Some(room) => {
                room.close();
                true
            }
            None => false,
        }
    }

    pub fn list_rooms(&self) -> Vec<RoomSummary> {
        self.rooms.values().map(|room| room.summary()).collect()
    }

    pub fn find_room(&self, room_id: RoomId) -> Result<Arc<Room>, RelayError> {
        self.rooms
            .get(&room_id)
            .cloned()
            .ok_or(RelayError::RoomNotFound(room_id))
    }
}

/// Commands sent to the registry actor
pub(crate) enum RegistryCommand {
    Login {
        reply: oneshot::Sender<Result<ParticipantId, RelayError>>,
    },
    Logout {
        participant: ParticipantId,
    },
    IsActive {
        participant: ParticipantId,
        reply: oneshot::Sender<bool>,
    },
    CreateRoom {
        name: String,
        reply: oneshot::Sender<Result<RoomSummary, RelayError>>,
    },
    RemoveRoom {
        room_id: RoomId,
        reply: oneshot::Sender<()>,
    },
    ListRooms {
        reply: oneshot::Sender<Vec<RoomSummary>>,
    },
    FindRoom {
        room_id: RoomId,
        reply: oneshot::Sender<Result<Arc<Room>, RelayError>>,
    },
}

pub(crate) async fn registry_actor(mut registry: Registry, mut rx: mpsc::Receiver<RegistryCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            RegistryCommand::Login { reply } => {
                let result = registry.login();
                if let Ok(id) = &result {
                    info!(participant_id = %id, "participant logged in");
                }
                let _ = reply.send(result);
            }

            RegistryCommand::Logout { participant } => {
                if registry.logout(participant) {
                    info!(participant_id = %participant, "participant logged out");
                }
            }

            RegistryCommand::IsActive { participant, reply } => {
                let _ = reply.send(registry.is_active(participant));
            }

            RegistryCommand::CreateRoom { name, reply } => {
                let result = registry.create_room(name).map(|room| {
                    info!(room_id = %room.id(), room_name = room.name(), "room created");
                    room.summary()
                });
                let _ = reply.send(result);
            }

            RegistryCommand::RemoveRoom { room_id, reply } => {
                if registry.remove_room(room_id) {
                    info!(room_id = %room_id, "room removed");
                }
                let _ = reply.send(());
            }

            RegistryCommand::ListRooms { reply } => {
                let _ = reply.send(registry.list_rooms());
            }

            RegistryCommand::FindRoom { room_id, reply } => {
                let _ = reply.send(registry.find_room(room_id));
            }
        }
    }
}

/// Handle to communicate with the registry actor
#[derive(Clone)]
pub struct RegistryHandle {
    pub(crate) tx: mpsc::Sender<RegistryCommand>,
}

impl RegistryHandle {
    /// Spawn a registry actor on the current runtime
    pub fn spawn() -> Self {
        Self::spawn_with(Registry::new())
    }

    pub fn spawn_with(registry: Registry) -> Self {
        let (tx, rx) = mpsc::channel::<RegistryCommand>(REGISTRY_QUEUE);
        tokio::spawn(registry_actor(registry, rx));
        Self { tx }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> RegistryCommand,
    ) -> Result<T, RelayError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx.send(make(reply_tx)).await.map_err(|_| closed())?;
        reply_rx.await.map_err(|_| closed())
    }

    pub async fn login(&self) -> Result<ParticipantId, RelayError> {
        self.request(|reply| RegistryCommand::Login { reply }).await?
    }

    /// Queue a logout; the actor applies it without replying
    pub async fn logout(&self, participant: ParticipantId) -> Result<(), RelayError> {
        self.tx
            .send(RegistryCommand::Logout { participant })
            .await
            .map_err(|_| closed())
    }

    pub async fn is_active(&self, participant: ParticipantId) -> Result<bool, RelayError> {
        self.request(|reply| RegistryCommand::IsActive { participant, reply })
            .await
    }

    pub async fn create_room(&self, name: impl Into<String>) -> Result<RoomSummary, RelayError> {
        let name = name.into();
        self.request(|reply| RegistryCommand::CreateRoom { name, reply })
            .await?
    }

    pub async fn remove_room(&self, room_id: RoomId) -> Result<(), RelayError> {
        self.request(|reply| RegistryCommand::RemoveRoom { room_id, reply })
            .await
    }

    pub async fn list_rooms(&self) -> Result<Vec<RoomSummary>, RelayError> {
        self.request(|reply| RegistryCommand::ListRooms { reply })
            .await
    }

    pub async fn find_room(&self, room_id: RoomId) -> Result<Arc<Room>, RelayError> {
        self.request(|reply| RegistryCommand::FindRoom { room_id, reply })
            .await?
    }
}

fn closed() -> RelayError {
    RelayError::Internal("registry channel closed".to_string())
}
