use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::PROVISIONAL_ID_PREFIX;

/// Identifier of a chat room, as assigned by the backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct RoomId(pub String);

impl RoomId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RoomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RoomId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

/// Identifier of a user (the backend's principal). Ordered so reader sets
/// can live in sorted collections.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

/// Identifier of a message.
///
/// A `Provisional` id is generated locally for an optimistic entry and is
/// never authoritative: the entry carrying it must be *replaced* once the
/// server echo with a `Confirmed` id arrives. The `local-` prefix is the
/// wire-compatible encoding of the provisional state; it is produced and
/// recognized only here, never sniffed at call sites.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageId {
    /// Locally generated id for a not-yet-confirmed optimistic message.
    Provisional(String),
    /// Server-assigned authoritative id.
    Confirmed(String),
}

impl MessageId {
    /// Generate a fresh provisional id for an optimistic send by `user`.
    pub fn new_provisional(user: &UserId) -> Self {
        Self::Provisional(format!(
            "{}{}-{}",
            PROVISIONAL_ID_PREFIX,
            user.0,
            Uuid::new_v4().simple()
        ))
    }

    /// Wrap a server-assigned id.
    pub fn confirmed(id: impl Into<String>) -> Self {
        Self::Confirmed(id.into())
    }

    pub fn is_provisional(&self) -> bool {
        matches!(self, Self::Provisional(_))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Provisional(s) | Self::Confirmed(s) => s,
        }
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        if s.starts_with(PROVISIONAL_ID_PREFIX) {
            Self::Provisional(s.to_string())
        } else {
            Self::Confirmed(s.to_string())
        }
    }
}

impl Serialize for MessageId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MessageId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::from(s.as_str()))
    }
}

/// Lifecycle of the push connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}
