use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which identifier pool an allocation was drawn from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    Participant,
    Room,
}

impl fmt::Display for IdKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdKind::Participant => f.write_str("participant"),
            IdKind::Room => f.write_str("room"),
        }
    }
}

/// Status kinds a failed call is reported with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unauthenticated,
    InvalidArgument,
    NotFound,
    ResourceExhausted,
    Unavailable,
    Internal,
}

/// Relay errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    #[error("missing metadata: {0}")]
    Unauthenticated(&'static str),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("room not found: {0}")]
    RoomNotFound(RoomId),

    #[error("participant not found: {0}")]
    ParticipantNotFound(ParticipantId),

    #[error("could not allocate a {0} id")]
    ExhaustedIdSpace(IdKind),

    #[error("stream unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl RelayError {
    pub fn code(&self) -> ErrorCode {
        match self {
            RelayError::Unauthenticated(_) => ErrorCode::Unauthenticated,
            RelayError::InvalidArgument(_) => ErrorCode::InvalidArgument,
            RelayError::RoomNotFound(_) | RelayError::ParticipantNotFound(_) => ErrorCode::NotFound,
            RelayError::ExhaustedIdSpace(_) => ErrorCode::ResourceExhausted,
            RelayError::Unavailable(_) => ErrorCode::Unavailable,
            RelayError::Internal(_) => ErrorCode::Internal,
        }
    }
}

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident, $kind:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u32);

        impl $name {
            pub const KIND: IdKind = $kind;

            pub const fn new(raw: u32) -> Self {
                Self(raw)
            }

            pub const fn get(self) -> u32 {
                self.0
            }
        }

        impl From<u32> for $name {
            fn from(raw: u32) -> Self {
                Self(raw)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = RelayError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim().parse::<u32>().map(Self).map_err(|e| {
                    RelayError::InvalidArgument(format!("invalid {} id {:?}: {}", $kind, s, e))
                })
            }
        }
    };
}

id_type!(
    /// Participant ID: opaque 32-bit value handed out at login
    ParticipantId,
    IdKind::Participant
);

id_type!(
    /// Room ID: opaque 32-bit value handed out at room creation
    RoomId,
    IdKind::Room
);

/// A single chat line relayed between occupants of a room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub text: String,
}

impl ChatMessage {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

impl From<&str> for ChatMessage {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Room entry as listed to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSummary {
    pub room_id: RoomId,
    pub room_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn participant_id_parses_decimal() {
        let id: ParticipantId = "1234".parse().unwrap();
        assert_eq!(id, ParticipantId::new(1234));
    }

    #[test]
    fn room_id_rejects_non_numeric() {
        let err = "lobby".parse::<RoomId>().unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
        assert!(err.to_string().contains("room"));
    }

    #[test]
    fn room_id_rejects_negative() {
        assert!("-5".parse::<RoomId>().is_err());
    }

    #[test]
    fn id_display() {
        assert_eq!(format!("{}", RoomId::new(42)), "42");
        assert_eq!(format!("{}", ParticipantId::new(7)), "7");
    }

    #[test]
    fn id_serializes_as_number() {
        let json = serde_json::to_string(&RoomId::new(99)).unwrap();
        assert_eq!(json, "99");
        let id: ParticipantId = serde_json::from_str("17").unwrap();
        assert_eq!(id.get(), 17);
    }

    #[test]
    fn not_found_variants_share_code() {
        assert_eq!(
            RelayError::RoomNotFound(RoomId::new(1)).code(),
            ErrorCode::NotFound
        );
        assert_eq!(
            RelayError::ParticipantNotFound(ParticipantId::new(1)).code(),
            ErrorCode::NotFound
        );
    }

    #[test]
    fn exhausted_maps_to_resource_exhausted() {
        let err = RelayError::ExhaustedIdSpace(IdKind::Room);
        assert_eq!(err.code(), ErrorCode::ResourceExhausted);
        assert_eq!(err.to_string(), "could not allocate a room id");
    }

    #[test]
    fn error_code_serialization() {
        let json = serde_json::to_string(&ErrorCode::InvalidArgument).unwrap();
        assert_eq!(json, "\"invalid_argument\"");
    }

    #[test]
    fn chat_message_roundtrip_shape() {
        let msg: ChatMessage = serde_json::from_str(r#"{"text": "hi"}"#).unwrap();
        assert_eq!(msg, ChatMessage::from("hi"));
    }
}
