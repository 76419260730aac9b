use serde::{Deserialize, Serialize};

use super::metadata::CallMetadata;
use super::types::{ChatMessage, ErrorCode, ParticipantId, RelayError, RoomId, RoomSummary};

/// A call sent from client to server on the request connection
#[derive(Debug, Serialize, Deserialize)]
pub struct Request {
    /// Correlates replies with this call
    pub id: u64,

    #[serde(default)]
    pub metadata: CallMetadata,

    #[serde(flatten)]
    pub call: Call,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Call {
    /// Obtain a participant id
    Login,

    /// Give up the participant id named in metadata
    Logout,

    /// Stream every room as a `room` frame, then `done`
    ListRooms,

    CreateRoom { room_name: String },

    RemoveRoom { room_id: RoomId },

    /// Enter a room as the participant named in metadata
    EnterRoom { room_id: RoomId },

    /// Leave the room named in metadata
    ExitRoom,
}

/// A frame sent by the client on a chat stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChatFrame {
    /// `{"end": true}` ends input; queued mail is flushed before the server closes
    End { end: bool },

    Line(ChatMessage),
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Login reply
    LoggedIn { id: u64, participant_id: ParticipantId },

    /// CreateRoom reply, or one ListRooms entry
    Room {
        id: u64,
        room_id: RoomId,
        room_name: String,
    },

    /// Empty reply; also ends a ListRooms stream
    Done { id: u64 },

    /// A chat line relayed from another occupant
    Chat { text: String },

    /// Call or stream failure
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
        code: ErrorCode,
        message: String,
    },
}

impl ServerMessage {
    pub fn room(id: u64, room: RoomSummary) -> Self {
        ServerMessage::Room {
            id,
            room_id: room.room_id,
            room_name: room.room_name,
        }
    }

    pub fn error(id: Option<u64>, err: &RelayError) -> Self {
        ServerMessage::Error {
            id,
            code: err.code(),
            message: err.to_string(),
        }
    }
}
