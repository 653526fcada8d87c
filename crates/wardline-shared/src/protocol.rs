//! Wire contract with the messaging backend.
//!
//! Two surfaces share these payloads: the paged REST endpoints and the push
//! socket. The socket speaks JSON text frames with STOMP-style destinations;
//! each room exposes four channels (messages, read receipts, participant
//! changes, unread-count broadcasts) plus one application-level send
//! destination.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::WireError;
use crate::types::RoomId;

// ---------------------------------------------------------------------------
// Channels / destinations
// ---------------------------------------------------------------------------

/// A logical push channel, one of the four per-room streams.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Message created/updated/deleted stream for a room.
    Messages(RoomId),
    /// Read-receipt stream for a room.
    Read(RoomId),
    /// Participants-changed stream (full participant list) for a room.
    Participants(RoomId),
    /// Room-level unread-count broadcast for a room.
    UnreadCount(RoomId),
}

impl Channel {
    /// The STOMP destination string for this channel.
    pub fn destination(&self) -> String {
        match self {
            Self::Messages(r) => format!("/topic/chat/{r}"),
            Self::Read(r) => format!("/topic/chat/{r}/read"),
            Self::Participants(r) => format!("/topic/chat/{r}/participants"),
            Self::UnreadCount(r) => format!("/topic/chat/{r}/unread-count"),
        }
    }

    /// Parse a destination string back into a channel.
    pub fn parse(destination: &str) -> Result<Self, WireError> {
        let rest = destination
            .strip_prefix("/topic/chat/")
            .ok_or_else(|| WireError::UnknownDestination(destination.to_string()))?;

        if let Some(room) = rest.strip_suffix("/read") {
            Ok(Self::Read(RoomId::new(room)))
        } else if let Some(room) = rest.strip_suffix("/participants") {
            Ok(Self::Participants(RoomId::new(room)))
        } else if let Some(room) = rest.strip_suffix("/unread-count") {
            Ok(Self::UnreadCount(RoomId::new(room)))
        } else if !rest.is_empty() && !rest.contains('/') {
            Ok(Self::Messages(RoomId::new(rest)))
        } else {
            Err(WireError::UnknownDestination(destination.to_string()))
        }
    }

    /// The room this channel belongs to.
    pub fn room_id(&self) -> &RoomId {
        match self {
            Self::Messages(r) | Self::Read(r) | Self::Participants(r) | Self::UnreadCount(r) => r,
        }
    }
}

// ---------------------------------------------------------------------------
// Socket frames
// ---------------------------------------------------------------------------

/// Frames the client sends over the push socket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientFrame {
    Subscribe {
        destination: String,
    },
    Unsubscribe {
        destination: String,
    },
    /// Application-level publish. The bearer token rides on each send so the
    /// backend sees rotated credentials without a new handshake.
    Send {
        destination: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        authorization: Option<String>,
        body: serde_json::Value,
    },
}

/// Frames the backend pushes to the client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerFrame {
    Message {
        destination: String,
        body: serde_json::Value,
    },
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// A message record as the backend serializes it, identical on the paged
/// REST endpoint and the per-room message channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMessage {
    pub id: String,
    #[serde(default)]
    pub room_id: Option<String>,
    pub sender_id: String,
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub sender_name: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub read_by: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_name: Option<String>,
    #[serde(default)]
    pub is_invite_message: bool,
    #[serde(default)]
    pub is_exit_message: bool,
    #[serde(default)]
    pub is_date_message: bool,
    #[serde(default)]
    pub participant_count_at_send: u32,
    #[serde(default)]
    pub deleted: bool,
}

/// One page of a room's message history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePage {
    pub content: Vec<RawMessage>,
    pub total_pages: u32,
}

/// A single read receipt on a room's read channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub message_id: String,
    pub user_id: String,
}

/// Authoritative room-level unread broadcast, optionally bundled with the
/// latest preview text and its timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadBroadcast {
    #[serde(default)]
    pub unread_counts: HashMap<String, u32>,
    #[serde(default)]
    pub last_message_content: Option<String>,
    #[serde(default)]
    pub last_message_timestamp: Option<DateTime<Utc>>,
}

/// A room participant as the backend serializes it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantRecord {
    pub id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub position: Option<String>,
    #[serde(default)]
    pub profile_image: Option<String>,
}

/// A room as returned by the room-list and single-room endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRecord {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub last_message: Option<String>,
    #[serde(default)]
    pub unread_count: Option<u32>,
    #[serde(default)]
    pub participants: Vec<ParticipantRecord>,
    #[serde(default)]
    pub is_group: bool,
    #[serde(default)]
    pub last_activity: Option<DateTime<Utc>>,
}

/// Body published on the send destination.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    pub room_id: String,
    pub sender: String,
    pub sender_name: String,
    pub sender_id: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub participant_count_at_send: u32,
}

/// Response of the per-room unread-count endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadCountResponse {
    #[serde(default)]
    pub unread_count: u32,
}

// ---------------------------------------------------------------------------
// Typed push events
// ---------------------------------------------------------------------------

/// A decoded push event: the channel it arrived on plus its typed body.
#[derive(Debug, Clone)]
pub enum PushEvent {
    Message {
        room_id: RoomId,
        message: RawMessage,
    },
    Receipt {
        room_id: RoomId,
        receipt: ReadReceipt,
    },
    Participants {
        room_id: RoomId,
        participants: Vec<ParticipantRecord>,
    },
    UnreadCount {
        room_id: RoomId,
        broadcast: UnreadBroadcast,
    },
}

impl PushEvent {
    /// Decode a server frame body according to its destination.
    pub fn decode(destination: &str, body: serde_json::Value) -> Result<Self, WireError> {
        let channel = Channel::parse(destination)?;
        let room_id = channel.room_id().clone();
        match channel {
            Channel::Messages(_) => Ok(Self::Message {
                room_id,
                message: serde_json::from_value(body)?,
            }),
            Channel::Read(_) => Ok(Self::Receipt {
                room_id,
                receipt: serde_json::from_value(body)?,
            }),
            Channel::Participants(_) => Ok(Self::Participants {
                room_id,
                participants: serde_json::from_value(body)?,
            }),
            Channel::UnreadCount(_) => Ok(Self::UnreadCount {
                room_id,
                broadcast: serde_json::from_value(body)?,
            }),
        }
    }

    pub fn room_id(&self) -> &RoomId {
        match self {
            Self::Message { room_id, .. }
            | Self::Receipt { room_id, .. }
            | Self::Participants { room_id, .. }
            | Self::UnreadCount { room_id, .. } => room_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destinations_round_trip() {
        let room = RoomId::new("42");
        for channel in [
            Channel::Messages(room.clone()),
            Channel::Read(room.clone()),
            Channel::Participants(room.clone()),
            Channel::UnreadCount(room.clone()),
        ] {
            let dest = channel.destination();
            assert_eq!(Channel::parse(&dest).unwrap(), channel);
        }
    }

    #[test]
    fn rejects_foreign_destinations() {
        assert!(Channel::parse("/queue/other").is_err());
        assert!(Channel::parse("/topic/chat/").is_err());
        assert!(Channel::parse("/topic/chat/42/typing").is_err());
    }

    #[test]
    fn decodes_raw_message_with_missing_optionals() {
        let body = serde_json::json!({
            "id": "987",
            "senderId": "u2",
            "content": "hello",
            "timestamp": "2025-03-07T09:30:00Z",
        });
        let event = PushEvent::decode("/topic/chat/7", body).unwrap();
        match event {
            PushEvent::Message { room_id, message } => {
                assert_eq!(room_id, RoomId::new("7"));
                assert_eq!(message.id, "987");
                assert!(message.read_by.is_empty());
                assert!(!message.deleted);
                assert_eq!(message.participant_count_at_send, 0);
            }
            other => panic!("expected message event, got {other:?}"),
        }
    }

    #[test]
    fn decodes_unread_broadcast() {
        let body = serde_json::json!({
            "unreadCounts": { "u1": 3, "u2": 0 },
            "lastMessageContent": "회진 일정",
            "lastMessageTimestamp": "2025-03-07T09:30:00Z",
        });
        let event = PushEvent::decode("/topic/chat/7/unread-count", body).unwrap();
        match event {
            PushEvent::UnreadCount { broadcast, .. } => {
                assert_eq!(broadcast.unread_counts.get("u1"), Some(&3));
                assert_eq!(broadcast.last_message_content.as_deref(), Some("회진 일정"));
            }
            other => panic!("expected unread event, got {other:?}"),
        }
    }

    #[test]
    fn client_frames_serialize_with_type_tag() {
        let frame = ClientFrame::Subscribe {
            destination: "/topic/chat/1".into(),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "subscribe");
        assert_eq!(json["destination"], "/topic/chat/1");
    }
}
