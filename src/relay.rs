//! Multi-room chat relay: registry, rooms, mailboxes and the streaming
//! relay engine, served over WebSocket

mod alloc;
mod engine;
mod messages;
mod metadata;
mod registry;
mod room;
mod server;
mod service;
mod types;

pub use alloc::{MAX_ID_ATTEMPTS, allocate};
pub use engine::ChatSession;
pub use messages::{Call, ChatFrame, Request, ServerMessage};
pub use metadata::{CallMetadata, PARTICIPANT_ID_KEY, ROOM_ID_KEY};
pub use registry::{Registry, RegistryHandle};
pub use room::{Delivery, Room};
pub use server::{CHAT_PATH, DEFAULT_RELAY_PORT, RelayServer};
pub use service::ChatService;
pub use types::{
    ChatMessage, ErrorCode, IdKind, ParticipantId, RelayError, RoomId, RoomSummary,
};
