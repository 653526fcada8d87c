//! Room Registry: the ordered set of chat rooms visible to the current user.
//!
//! The registry is mutated by several components in the same tick (read
//! tracker, fan-out, history loader), so every mutation goes through
//! [`RoomRegistry::merge`], a pure merge over the previous room value.
//! Partial direct field writes are deliberately not exposed.

use chrono::{DateTime, Utc};
use tracing::debug;

use wardline_shared::protocol::RoomRecord;
use wardline_shared::{RoomId, UserId};

use crate::model::Participant;

/// A chat room as the registry tracks it.
#[derive(Debug, Clone)]
pub struct Room {
    pub id: RoomId,
    pub display_name: String,
    /// Preview of the last message, as shown in the room list.
    pub last_message: String,
    pub unread_count: u32,
    pub participants: Vec<Participant>,
    pub is_group: bool,
    pub last_activity: DateTime<Utc>,
    /// Timestamp of the message the preview reflects. Used to decide whether
    /// an authoritative broadcast is newer than local state.
    pub last_updated: DateTime<Utc>,
    /// Set to false when the backend answers 403 for this room.
    pub accessible: bool,
}

impl Room {
    pub fn from_record(record: RoomRecord) -> Self {
        let now = Utc::now();
        Self {
            id: RoomId::new(record.id),
            display_name: record.display_name.unwrap_or_default(),
            last_message: record.last_message.unwrap_or_default(),
            unread_count: record.unread_count.unwrap_or(0),
            participants: record.participants.into_iter().map(Participant::from).collect(),
            is_group: record.is_group,
            last_activity: record.last_activity.unwrap_or(now),
            last_updated: record.last_activity.unwrap_or(now),
            accessible: true,
        }
    }

    /// Pure merge of a patch into this room.
    ///
    /// An empty incoming preview never erases a non-empty one, and the
    /// activity timestamps advance only when the preview actually changed.
    fn merged(&self, patch: &RoomPatch) -> Room {
        let mut next = self.clone();

        if let Some(preview) = &patch.last_message {
            if !preview.trim().is_empty() {
                next.last_message = preview.clone();
            }
        }

        if let Some(count) = patch.unread_count {
            next.unread_count = count;
        }

        let message_changed = next.last_message != self.last_message;
        if message_changed {
            next.last_activity = Utc::now();
            next.last_updated = patch.last_message_timestamp.unwrap_or_else(Utc::now);
        } else if let Some(ts) = patch.last_message_timestamp {
            if ts > next.last_updated {
                next.last_updated = ts;
            }
        }

        next
    }
}

/// A partial room update. `None` fields leave the previous value in place.
#[derive(Debug, Clone, Default)]
pub struct RoomPatch {
    pub last_message: Option<String>,
    pub unread_count: Option<u32>,
    pub last_message_timestamp: Option<DateTime<Utc>>,
}

impl RoomPatch {
    pub fn unread(count: u32) -> Self {
        Self {
            unread_count: Some(count),
            ..Self::default()
        }
    }

    pub fn preview(last_message: impl Into<String>, unread_count: u32) -> Self {
        Self {
            last_message: Some(last_message.into()),
            unread_count: Some(unread_count),
            last_message_timestamp: None,
        }
    }
}

/// Ordered set of rooms the current user belongs to.
#[derive(Debug, Clone, Default)]
pub struct RoomRegistry {
    rooms: Vec<Room>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rooms(&self) -> &[Room] {
        &self.rooms
    }

    pub fn get(&self, id: &RoomId) -> Option<&Room> {
        self.rooms.iter().find(|r| &r.id == id)
    }

    pub fn contains(&self, id: &RoomId) -> bool {
        self.get(id).is_some()
    }

    /// Replace the whole room list from a refresh, preserving server order.
    ///
    /// Rooms the user exited disappear here; badges of rooms that survive
    /// are kept when the incoming record carries none (transient badge loss
    /// while history is still loading is worse than a stale figure).
    pub fn replace_all(&mut self, records: Vec<RoomRecord>) {
        let previous = std::mem::take(&mut self.rooms);
        self.rooms = records
            .into_iter()
            .map(|rec| {
                let mut room = Room::from_record(rec);
                if let Some(old) = previous.iter().find(|r| r.id == room.id) {
                    if room.unread_count == 0 {
                        room.unread_count = old.unread_count;
                    }
                    if room.last_message.trim().is_empty() {
                        room.last_message = old.last_message.clone();
                    }
                    room.accessible = old.accessible;
                }
                room
            })
            .collect();
    }

    /// Apply a patch to one room through the pure merge.
    pub fn merge(&mut self, id: &RoomId, patch: RoomPatch) {
        if let Some(room) = self.rooms.iter_mut().find(|r| &r.id == id) {
            *room = room.merged(&patch);
            debug!(room = %id, unread = room.unread_count, "Merged room patch");
        }
    }

    /// Wholesale participant refresh for one room.
    pub fn set_participants(&mut self, id: &RoomId, participants: Vec<Participant>) {
        if let Some(room) = self.rooms.iter_mut().find(|r| &r.id == id) {
            room.participants = participants;
        }
    }

    /// Mark a room inaccessible after a permission failure. Not retried.
    pub fn mark_inaccessible(&mut self, id: &RoomId) {
        if let Some(room) = self.rooms.iter_mut().find(|r| &r.id == id) {
            room.accessible = false;
            room.unread_count = 0;
        }
    }

    /// Whether `user` is still a member of the room, per the last refresh.
    pub fn is_member(&self, id: &RoomId, user: &UserId) -> bool {
        self.get(id)
            .map(|room| room.participants.iter().any(|p| &p.user_id == user))
            .unwrap_or(false)
    }

    /// Sum of badges across all rooms.
    pub fn total_unread(&self) -> u32 {
        self.rooms.iter().map(|r| r.unread_count).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(id: &str, unread: Option<u32>, preview: Option<&str>) -> RoomRecord {
        RoomRecord {
            id: id.to_string(),
            display_name: Some(format!("room {id}")),
            last_message: preview.map(str::to_string),
            unread_count: unread,
            participants: vec![],
            is_group: false,
            last_activity: None,
        }
    }

    #[test]
    fn empty_preview_never_erases_existing_one() {
        let mut registry = RoomRegistry::new();
        registry.replace_all(vec![record("1", Some(2), Some("previous preview"))]);

        registry.merge(&RoomId::new("1"), RoomPatch::preview("", 0));
        let room = registry.get(&RoomId::new("1")).unwrap();
        assert_eq!(room.last_message, "previous preview");
        assert_eq!(room.unread_count, 0);
    }

    #[test]
    fn activity_advances_only_when_preview_changes() {
        let mut registry = RoomRegistry::new();
        registry.replace_all(vec![record("1", None, Some("old"))]);
        let before = registry.get(&RoomId::new("1")).unwrap().last_activity;

        registry.merge(&RoomId::new("1"), RoomPatch::unread(5));
        let unchanged = registry.get(&RoomId::new("1")).unwrap();
        assert_eq!(unchanged.last_activity, before);

        registry.merge(&RoomId::new("1"), RoomPatch::preview("new text", 5));
        let changed = registry.get(&RoomId::new("1")).unwrap();
        assert!(changed.last_activity >= before);
        assert_eq!(changed.last_message, "new text");
    }

    #[test]
    fn refresh_preserves_badges_the_server_omits() {
        let mut registry = RoomRegistry::new();
        registry.replace_all(vec![record("1", Some(4), Some("p"))]);
        registry.replace_all(vec![record("1", None, None), record("2", Some(1), None)]);

        assert_eq!(registry.get(&RoomId::new("1")).unwrap().unread_count, 4);
        assert_eq!(registry.get(&RoomId::new("1")).unwrap().last_message, "p");
        assert_eq!(registry.total_unread(), 5);
    }

    #[test]
    fn refresh_drops_exited_rooms() {
        let mut registry = RoomRegistry::new();
        registry.replace_all(vec![record("1", Some(1), None), record("2", Some(2), None)]);
        registry.replace_all(vec![record("2", None, None)]);

        assert!(!registry.contains(&RoomId::new("1")));
        assert!(registry.contains(&RoomId::new("2")));
    }

    #[test]
    fn broadcast_timestamp_is_recorded_on_preview_change() {
        let mut registry = RoomRegistry::new();
        registry.replace_all(vec![record("1", None, None)]);

        let ts = Utc.with_ymd_and_hms(2025, 3, 7, 9, 30, 0).unwrap();
        registry.merge(
            &RoomId::new("1"),
            RoomPatch {
                last_message: Some("from broadcast".into()),
                unread_count: Some(3),
                last_message_timestamp: Some(ts),
            },
        );
        assert_eq!(registry.get(&RoomId::new("1")).unwrap().last_updated, ts);
    }

    #[test]
    fn inaccessible_rooms_lose_their_badge() {
        let mut registry = RoomRegistry::new();
        registry.replace_all(vec![record("1", Some(7), None)]);
        registry.mark_inaccessible(&RoomId::new("1"));

        let room = registry.get(&RoomId::new("1")).unwrap();
        assert!(!room.accessible);
        assert_eq!(room.unread_count, 0);
    }
}
