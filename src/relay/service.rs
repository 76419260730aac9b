use tracing::info;

use super::engine::ChatSession;
use super::metadata::CallMetadata;
use super::registry::RegistryHandle;
use super::types::{ParticipantId, RelayError, RoomId, RoomSummary};

/// The chat RPC surface. Every method validates its metadata before
/// touching any state.
#[derive(Clone)]
pub struct ChatService {
    registry: RegistryHandle,
}

impl ChatService {
    pub fn new(registry: RegistryHandle) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &RegistryHandle {
        &self.registry
    }

    pub async fn login(&self) -> Result<ParticipantId, RelayError> {
        self.registry.login().await
    }

    pub async fn logout(&self, metadata: &CallMetadata) -> Result<(), RelayError> {
        let participant = metadata.participant_id()?;
        self.registry.logout(participant).await
    }

    pub async fn list_rooms(&self) -> Result<Vec<RoomSummary>, RelayError> {
        self.registry.list_rooms().await
    }

    pub async fn create_room(&self, room_name: String) -> Result<RoomSummary, RelayError> {
        self.registry.create_room(room_name).await
    }

    pub async fn remove_room(&self, room_id: RoomId) -> Result<(), RelayError> {
        self.registry.remove_room(room_id).await
    }

    pub async fn enter_room(
        &self,
        metadata: &CallMetadata,
        room_id: RoomId,
    ) -> Result<(), RelayError> {
        let participant = metadata.participant_id()?;
        let room = self.registry.find_room(room_id).await?;
        if !self.registry.is_active(participant).await? {
            return Err(RelayError::ParticipantNotFound(participant));
        }

        room.enter(participant)?;
        info!(room_id = %room_id, participant_id = %participant, "entered room");
        Ok(())
    }

    pub async fn exit_room(&self, metadata: &CallMetadata) -> Result<(), RelayError> {
        let participant = metadata.participant_id()?;
        let room_id = metadata.room_id()?;
        let room = self.registry.find_room(room_id).await?;

        if room.exit(participant) {
            info!(room_id = %room_id, participant_id = %participant, "exited room");
        }
        Ok(())
    }

    /// Validate a chat stream's routing; run the returned session to relay.
    pub async fn open_chat(&self, metadata: &CallMetadata) -> Result<ChatSession, RelayError> {
        ChatSession::establish(&self.registry, metadata).await
    }
}
