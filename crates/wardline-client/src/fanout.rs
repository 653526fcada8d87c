//! Global fan-out: messages and unread broadcasts for rooms that are not
//! on screen.
//!
//! Every room's message channel stays subscribed for the whole session, so
//! background rooms keep their badges and previews live. A per-session set
//! of already-counted message ids keeps the badge increment idempotent
//! against redelivery.

use std::collections::HashSet;

use tokio::sync::mpsc;
use tracing::debug;

use wardline_shared::constants::IDEMPOTENCE_SET_CAP;
use wardline_shared::preview::preview_text;
use wardline_shared::protocol::UnreadBroadcast;
use wardline_shared::{RoomId, UserId};
use wardline_store::{Message, RoomPatch};

use crate::events::ChatEvent;
use crate::state::EngineState;

/// Per-session fan-out state.
#[derive(Debug, Default)]
pub struct Fanout {
    counted: HashSet<String>,
}

impl Fanout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Absorb a pushed message for a room that is not active.
    ///
    /// Bumps the room badge once per message id, updates the preview, and
    /// decides whether the embedder should raise a notification.
    /// `already_confirmed` says the read-marker cache already holds this id
    /// from an earlier session, in which case it never counts.
    pub fn handle_background_message(
        &mut self,
        state: &mut EngineState,
        events: &mpsc::UnboundedSender<ChatEvent>,
        message: &Message,
        user: &UserId,
        already_confirmed: bool,
    ) {
        let room = &message.room_id;
        let id = message.id.as_str().to_owned();

        let first_sighting = !message.id.is_provisional() && self.remember(&id);
        let counts = first_sighting && !already_confirmed && message.counts_unread_for(user);

        let preview = preview_text(
            message.attachment.as_ref().map(|a| a.kind.as_str()),
            &message.content,
        );
        let previous_badge = state
            .registry
            .get(room)
            .map(|r| r.unread_count)
            .unwrap_or(0);
        let badge = if counts { previous_badge + 1 } else { previous_badge };

        state.registry.merge(
            room,
            RoomPatch {
                last_message: Some(preview.clone()),
                unread_count: Some(badge),
                last_message_timestamp: Some(message.timestamp),
            },
        );

        // Keep an already-loaded timeline current even off screen.
        if !state.store.get(room).is_empty() {
            state.store.merge(room, vec![message.clone()]);
            let _ = events.send(ChatEvent::MessagesChanged { room_id: room.clone() });
        }

        if counts && message.classification.is_readable() {
            let title = state
                .registry
                .get(room)
                .map(|r| r.display_name.clone())
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| message.sender_name.clone());
            let _ = events.send(ChatEvent::Notify {
                room_id: room.clone(),
                message_id: id,
                title,
                body: preview,
            });
        }

        debug!(room = %room, badge, "Background message absorbed");
        let _ = events.send(ChatEvent::RoomsChanged);
        let _ = events.send(ChatEvent::TotalUnreadChanged(state.registry.total_unread()));
    }

    /// Apply an authoritative unread broadcast.
    ///
    /// A broadcast for the active room is ignored unless it carries a
    /// message timestamp newer than the newest message known locally, since
    /// the active room's badge is being zeroed by the read tracker at the
    /// same time. For any other room the broadcast always wins.
    pub fn apply_unread_broadcast(
        &mut self,
        state: &mut EngineState,
        events: &mpsc::UnboundedSender<ChatEvent>,
        room: &RoomId,
        broadcast: &UnreadBroadcast,
        user: &UserId,
    ) {
        let Some(count) = broadcast.unread_counts.get(user.as_str()).copied() else {
            return;
        };

        if state.is_active(room) {
            let local_latest = state.store.latest_timestamp(room);
            let newer = match (broadcast.last_message_timestamp, local_latest) {
                (Some(incoming), Some(local)) => incoming > local,
                (Some(_), None) => true,
                (None, _) => false,
            };
            if !newer {
                debug!(room = %room, "Ignoring unread broadcast for active room");
                return;
            }
        }

        state.registry.merge(
            room,
            RoomPatch {
                last_message: broadcast.last_message_content.clone(),
                unread_count: Some(count),
                last_message_timestamp: broadcast.last_message_timestamp,
            },
        );

        debug!(room = %room, count, "Unread broadcast applied");
        let _ = events.send(ChatEvent::RoomsChanged);
        let _ = events.send(ChatEvent::TotalUnreadChanged(state.registry.total_unread()));
    }

    /// Record a message id as counted. Returns false when it was already
    /// known. The set is cleared wholesale at the cap; re-counting an old
    /// redelivered id after that is tolerated.
    fn remember(&mut self, id: &str) -> bool {
        if self.counted.len() >= IDEMPOTENCE_SET_CAP {
            self.counted.clear();
        }
        self.counted.insert(id.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::collections::BTreeSet;
    use wardline_shared::{Classification, MessageId};

    fn state_with_rooms() -> EngineState {
        let mut state = EngineState::new();
        state.registry.replace_all(vec![
            serde_json::from_value(json!({ "id": "1", "displayName": "Ward A" })).unwrap(),
            serde_json::from_value(json!({ "id": "2", "displayName": "Ward B", "unreadCount": 1 }))
                .unwrap(),
        ]);
        state
    }

    fn incoming(room: &str, id: &str, sender: &str) -> Message {
        Message {
            id: MessageId::confirmed(id),
            room_id: RoomId::from(room),
            sender_id: UserId::from(sender),
            sender_name: "Dr. Park".into(),
            content: "rounds at 3pm".into(),
            timestamp: Utc.with_ymd_and_hms(2026, 8, 1, 10, 0, 0).unwrap(),
            read_by: BTreeSet::new(),
            attachment: None,
            participant_count_at_send: 2,
            classification: Classification::Normal,
            deleted: false,
        }
    }

    #[test]
    fn badge_increments_once_per_message_id() {
        let mut state = state_with_rooms();
        let mut fanout = Fanout::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let user = UserId::from("me");
        let message = incoming("2", "m1", "other");

        fanout.handle_background_message(&mut state, &tx, &message, &user, false);
        fanout.handle_background_message(&mut state, &tx, &message, &user, false);

        assert_eq!(state.registry.get(&RoomId::from("2")).unwrap().unread_count, 2);
    }

    #[test]
    fn own_messages_update_preview_without_counting() {
        let mut state = state_with_rooms();
        let mut fanout = Fanout::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let user = UserId::from("me");
        let message = incoming("1", "m2", "me");

        fanout.handle_background_message(&mut state, &tx, &message, &user, false);

        let room = state.registry.get(&RoomId::from("1")).unwrap();
        assert_eq!(room.unread_count, 0);
        assert_eq!(room.last_message, "rounds at 3pm");
        while let Ok(event) = rx.try_recv() {
            assert!(!matches!(event, ChatEvent::Notify { .. }));
        }
    }

    #[test]
    fn confirmed_read_ids_never_count() {
        let mut state = state_with_rooms();
        let mut fanout = Fanout::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let user = UserId::from("me");
        let message = incoming("1", "m3", "other");

        fanout.handle_background_message(&mut state, &tx, &message, &user, true);
        assert_eq!(state.registry.get(&RoomId::from("1")).unwrap().unread_count, 0);
    }

    #[test]
    fn notification_is_raised_for_countable_messages() {
        let mut state = state_with_rooms();
        let mut fanout = Fanout::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let user = UserId::from("me");

        fanout.handle_background_message(&mut state, &tx, &incoming("1", "m4", "other"), &user, false);

        let mut saw_notify = false;
        while let Ok(event) = rx.try_recv() {
            if let ChatEvent::Notify { title, body, .. } = event {
                assert_eq!(title, "Ward A");
                assert_eq!(body, "rounds at 3pm");
                saw_notify = true;
            }
        }
        assert!(saw_notify);
    }

    #[test]
    fn broadcast_for_inactive_room_always_wins() {
        let mut state = state_with_rooms();
        let mut fanout = Fanout::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let user = UserId::from("me");

        let mut counts = std::collections::HashMap::new();
        counts.insert("me".to_string(), 5u32);
        let broadcast = UnreadBroadcast {
            unread_counts: counts,
            last_message_content: Some("lab results in".into()),
            last_message_timestamp: Some(Utc.with_ymd_and_hms(2026, 8, 1, 9, 0, 0).unwrap()),
        };

        fanout.apply_unread_broadcast(&mut state, &tx, &RoomId::from("2"), &broadcast, &user);
        let room = state.registry.get(&RoomId::from("2")).unwrap();
        assert_eq!(room.unread_count, 5);
        assert_eq!(room.last_message, "lab results in");
    }

    #[test]
    fn broadcast_newer_than_local_timeline_updates_active_room() {
        let mut state = state_with_rooms();
        state.active_room = Some(RoomId::from("2"));
        let mut latest = incoming("2", "m8", "other");
        latest.timestamp = Utc.with_ymd_and_hms(2026, 8, 1, 9, 0, 0).unwrap();
        state.store.merge(&RoomId::from("2"), vec![latest]);
        let mut fanout = Fanout::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let user = UserId::from("me");

        let mut counts = std::collections::HashMap::new();
        counts.insert("me".to_string(), 3u32);
        let broadcast = UnreadBroadcast {
            unread_counts: counts,
            last_message_content: Some("stat order".into()),
            // Half an hour after the newest loaded message.
            last_message_timestamp: Some(Utc.with_ymd_and_hms(2026, 8, 1, 9, 30, 0).unwrap()),
        };

        fanout.apply_unread_broadcast(&mut state, &tx, &RoomId::from("2"), &broadcast, &user);
        assert_eq!(state.registry.get(&RoomId::from("2")).unwrap().unread_count, 3);
    }

    #[test]
    fn broadcast_older_than_local_timeline_is_ignored_for_active_room() {
        let mut state = state_with_rooms();
        state.active_room = Some(RoomId::from("2"));
        let mut latest = incoming("2", "m8", "other");
        latest.timestamp = Utc.with_ymd_and_hms(2026, 8, 1, 10, 0, 0).unwrap();
        state.store.merge(&RoomId::from("2"), vec![latest]);
        let mut fanout = Fanout::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let user = UserId::from("me");

        let mut counts = std::collections::HashMap::new();
        counts.insert("me".to_string(), 6u32);
        let broadcast = UnreadBroadcast {
            unread_counts: counts,
            last_message_content: None,
            last_message_timestamp: Some(Utc.with_ymd_and_hms(2026, 8, 1, 9, 30, 0).unwrap()),
        };

        fanout.apply_unread_broadcast(&mut state, &tx, &RoomId::from("2"), &broadcast, &user);
        assert_eq!(state.registry.get(&RoomId::from("2")).unwrap().unread_count, 1);
    }

    #[test]
    fn stale_broadcast_for_active_room_is_ignored() {
        let mut state = state_with_rooms();
        state.active_room = Some(RoomId::from("2"));
        let mut fanout = Fanout::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let user = UserId::from("me");

        let mut counts = std::collections::HashMap::new();
        counts.insert("me".to_string(), 9u32);
        let broadcast = UnreadBroadcast {
            unread_counts: counts,
            last_message_content: None,
            // No timestamp: cannot prove it is newer than local state.
            last_message_timestamp: None,
        };

        fanout.apply_unread_broadcast(&mut state, &tx, &RoomId::from("2"), &broadcast, &user);
        assert_eq!(state.registry.get(&RoomId::from("2")).unwrap().unread_count, 1);
    }

    #[test]
    fn broadcast_without_own_entry_is_a_no_op() {
        let mut state = state_with_rooms();
        let mut fanout = Fanout::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let user = UserId::from("me");

        let broadcast = UnreadBroadcast {
            unread_counts: std::collections::HashMap::new(),
            last_message_content: Some("x".into()),
            last_message_timestamp: None,
        };
        fanout.apply_unread_broadcast(&mut state, &tx, &RoomId::from("1"), &broadcast, &user);
        assert!(rx.try_recv().is_err());
    }
}
