//! Domain models owned by the store layer.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use wardline_shared::classify::classify;
use wardline_shared::protocol::{ParticipantRecord, RawMessage};
use wardline_shared::{Classification, MessageId, RoomId, UserId};

/// Redaction text shown in place of a deleted message.
pub const DELETED_PLACEHOLDER: &str = "메시지가 삭제되었습니다!";

/// An attachment reference carried by a message. The URL may arrive later
/// than the message itself (the backend pushes image messages before the
/// blob is addressable) and is backfilled in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub kind: String,
    pub url: Option<String>,
    pub name: Option<String>,
}

impl Attachment {
    pub fn is_image(&self) -> bool {
        self.kind == "image"
    }
}

/// A room participant. Immutable reference data for display, refreshed
/// wholesale whenever a participant-change event arrives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub id: String,
    pub user_id: UserId,
    pub name: String,
    pub department: Option<String>,
    pub position: Option<String>,
    pub profile_image: Option<String>,
}

impl From<ParticipantRecord> for Participant {
    fn from(rec: ParticipantRecord) -> Self {
        let user_id = UserId::new(rec.user_id.unwrap_or_else(|| rec.id.clone()));
        Self {
            id: rec.id,
            user_id,
            name: rec.name,
            department: rec.department,
            position: rec.position,
            profile_image: rec.profile_image,
        }
    }
}

/// One chat message in a room's time-sorted list.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: MessageId,
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub sender_name: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub read_by: BTreeSet<UserId>,
    pub attachment: Option<Attachment>,
    /// Number of participants excluding the sender, captured at send time.
    /// Never recomputed, so the unread denominator stays correct even when
    /// participants later change.
    pub participant_count_at_send: u32,
    pub classification: Classification,
    pub deleted: bool,
}

impl Message {
    /// Normalize a wire record into a store message for `self_user`'s view.
    ///
    /// The sender's own id is folded into `read_by` for self-authored rows,
    /// matching how the badge and the unread denominator are defined.
    pub fn from_raw(raw: RawMessage, fallback_room: &RoomId, self_user: &UserId) -> Self {
        let content = raw.content.unwrap_or_default();
        let classification = classify(
            &content,
            raw.is_invite_message,
            raw.is_exit_message,
            raw.is_date_message,
        );

        let room_id = raw
            .room_id
            .map(RoomId::new)
            .unwrap_or_else(|| fallback_room.clone());
        let sender_id = UserId::new(raw.sender_id);

        let mut read_by: BTreeSet<UserId> =
            raw.read_by.into_iter().map(UserId::new).collect();
        if &sender_id == self_user {
            read_by.insert(self_user.clone());
        }

        let attachment = raw.attachment_type.map(|kind| Attachment {
            kind,
            url: raw.attachment_url,
            name: raw.attachment_name,
        });

        Self {
            id: MessageId::confirmed(raw.id),
            room_id,
            sender_id,
            sender_name: raw.sender_name.or(raw.sender).unwrap_or_default(),
            content,
            timestamp: raw.timestamp,
            read_by,
            attachment,
            participant_count_at_send: raw.participant_count_at_send,
            classification,
            deleted: raw.deleted,
        }
    }

    /// Effective unread count: participants-at-send minus confirmed
    /// non-sender readers, clamped at zero. Deleted messages count as read.
    pub fn effective_unread(&self) -> u32 {
        if self.deleted {
            return 0;
        }
        let readers = self
            .read_by
            .iter()
            .filter(|id| **id != self.sender_id)
            .count() as u32;
        self.participant_count_at_send.saturating_sub(readers)
    }

    pub fn is_read_by(&self, user: &UserId) -> bool {
        self.read_by.contains(user)
    }

    /// Whether this message contributes to `user`'s room badge.
    pub fn counts_unread_for(&self, user: &UserId) -> bool {
        !self.deleted && &self.sender_id != user && !self.is_read_by(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn raw(id: &str, sender: &str, content: &str) -> RawMessage {
        RawMessage {
            id: id.to_string(),
            room_id: Some("r1".to_string()),
            sender_id: sender.to_string(),
            sender: None,
            sender_name: Some("name".to_string()),
            content: Some(content.to_string()),
            timestamp: Utc.with_ymd_and_hms(2025, 3, 7, 9, 0, 0).unwrap(),
            read_by: vec![],
            attachment_type: None,
            attachment_url: None,
            attachment_name: None,
            is_invite_message: false,
            is_exit_message: false,
            is_date_message: false,
            participant_count_at_send: 3,
            deleted: false,
        }
    }

    #[test]
    fn self_authored_rows_fold_in_own_read_marker() {
        let me = UserId::new("u1");
        let msg = Message::from_raw(raw("1", "u1", "hi"), &RoomId::new("r1"), &me);
        assert!(msg.is_read_by(&me));

        let other = Message::from_raw(raw("2", "u2", "hi"), &RoomId::new("r1"), &me);
        assert!(!other.is_read_by(&me));
    }

    #[test]
    fn effective_unread_never_goes_negative() {
        let me = UserId::new("u1");
        let mut msg = Message::from_raw(raw("1", "u2", "hi"), &RoomId::new("r1"), &me);
        assert_eq!(msg.effective_unread(), 3);

        for reader in ["a", "b", "c", "d"] {
            msg.read_by.insert(UserId::new(reader));
        }
        assert_eq!(msg.effective_unread(), 0);
    }

    #[test]
    fn sender_does_not_count_as_a_reader() {
        let me = UserId::new("u1");
        let mut msg = Message::from_raw(raw("1", "u2", "hi"), &RoomId::new("r1"), &me);
        msg.read_by.insert(UserId::new("u2"));
        assert_eq!(msg.effective_unread(), 3);

        msg.read_by.insert(UserId::new("u3"));
        msg.read_by.insert(UserId::new("u4"));
        assert_eq!(msg.effective_unread(), 1);
    }

    #[test]
    fn deleted_messages_count_as_read() {
        let me = UserId::new("u1");
        let mut msg = Message::from_raw(raw("1", "u2", "hi"), &RoomId::new("r1"), &me);
        assert!(msg.counts_unread_for(&me));
        msg.deleted = true;
        assert!(!msg.counts_unread_for(&me));
        assert_eq!(msg.effective_unread(), 0);
    }
}
