//! Routing metadata carried alongside a call

use std::collections::HashMap;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use super::types::{ParticipantId, RelayError, RoomId};

pub const PARTICIPANT_ID_KEY: &str = "participant_id";
pub const ROOM_ID_KEY: &str = "room_id";

/// Key/value pairs supplied by the caller with each request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct CallMetadata(HashMap<String, String>);

/// A metadata value as it appears on the wire
#[derive(Deserialize)]
#[serde(untagged)]
enum WireValue {
    Text(String),
    Number(serde_json::Number),
}

impl<'de> Deserialize<'de> for CallMetadata {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = HashMap::<String, WireValue>::deserialize(deserializer)?;
        Ok(raw
            .into_iter()
            .map(|(key, value)| match value {
                WireValue::Text(text) => (key, text),
                WireValue::Number(number) => (key, number.to_string()),
            })
            .collect())
    }
}

impl CallMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl ToString) {
        self.0.insert(key.into(), value.to_string());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn participant_id(&self) -> Result<ParticipantId, RelayError> {
        self.parse(PARTICIPANT_ID_KEY)
    }

    pub fn room_id(&self) -> Result<RoomId, RelayError> {
        self.parse(ROOM_ID_KEY)
    }

    fn parse<T>(&self, key: &'static str) -> Result<T, RelayError>
    where
        T: FromStr<Err = RelayError>,
    {
        self.get(key)
            .ok_or(RelayError::Unauthenticated(key))?
            .parse()
    }
}

impl<K: Into<String>, V: ToString> FromIterator<(K, V)> for CallMetadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut metadata = Self::new();
        for (key, value) in iter {
            metadata.insert(key, value);
        }
        metadata
    }
}
