//! Per-room Message Store with idempotent merge semantics.
//!
//! Three writers feed each room's list: paged history loads, live push
//! events, and local optimistic sends. The store reconciles them into one
//! time-sorted view and guarantees that an authoritative message id appears
//! at most once no matter how often it is delivered.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use wardline_shared::constants::{ECHO_MATCH_TOLERANCE_MS, OPTIMISTIC_DUPLICATE_WINDOW_MS};
use wardline_shared::{Classification, MessageId, RoomId, UserId};

use crate::model::{Message, DELETED_PLACEHOLDER};

/// How an authoritative echo was absorbed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoOutcome {
    /// A matching provisional entry was replaced in its slot.
    ReplacedProvisional,
    /// No provisional matched and the id was unknown; appended as a new row.
    Appended,
    /// The id was already present; the echo was discarded.
    Duplicate,
}

/// All message lists, keyed by room.
#[derive(Debug, Default)]
pub struct MessageStore {
    rooms: HashMap<RoomId, Vec<Message>>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The room's messages in display order.
    pub fn get(&self, room: &RoomId) -> &[Message] {
        self.rooms.get(room).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Replace a room's list wholesale (initial history load).
    pub fn replace(&mut self, room: &RoomId, mut messages: Vec<Message>) {
        sort_messages(&mut messages);
        self.rooms.insert(room.clone(), messages);
    }

    /// Drop a room's in-memory list (room switch with fresh reload).
    pub fn clear(&mut self, room: &RoomId) {
        self.rooms.remove(room);
    }

    /// Merge fetched or pushed messages into a room, idempotently.
    ///
    /// An already-known authoritative id is a no-op unless the incoming
    /// record carries new information (a previously absent attachment URL, a
    /// grown read-by set, a deletion), in which case the existing row is
    /// updated in place. Returns the number of rows actually added.
    pub fn merge(&mut self, room: &RoomId, incoming: Vec<Message>) -> usize {
        let list = self.rooms.entry(room.clone()).or_default();
        let mut added = 0;

        for msg in incoming {
            match list.iter_mut().find(|m| m.id == msg.id) {
                Some(existing) => {
                    if update_in_place(existing, &msg) {
                        debug!(room = %room, id = %msg.id, "Updated known message in place");
                    }
                }
                None => {
                    list.push(msg);
                    added += 1;
                }
            }
        }

        if added > 0 {
            sort_messages(list);
        }
        added
    }

    /// Insert an optimistic message ahead of the network round trip.
    ///
    /// A second provisional with the same sender and content inside a short
    /// window is treated as a double-submit and suppressed.
    pub fn insert_provisional(&mut self, message: Message) -> bool {
        debug_assert!(message.id.is_provisional());
        let list = self.rooms.entry(message.room_id.clone()).or_default();

        let duplicate = list.iter().any(|m| {
            m.id.is_provisional()
                && m.sender_id == message.sender_id
                && m.content == message.content
                && millis_between(m.timestamp, message.timestamp) < OPTIMISTIC_DUPLICATE_WINDOW_MS
        });
        if duplicate {
            warn!(room = %message.room_id, "Suppressed duplicate optimistic message");
            return false;
        }

        list.push(message);
        sort_messages(list);
        true
    }

    /// Reconcile an authoritative echo of a self-authored message.
    ///
    /// A provisional entry matching on (sender, content, timestamp within
    /// tolerance) is replaced in its slot, keeping the sort position stable.
    pub fn reconcile_echo(&mut self, room: &RoomId, incoming: Message) -> EchoOutcome {
        let list = self.rooms.entry(room.clone()).or_default();

        let provisional_slot = list.iter().position(|m| {
            m.id.is_provisional()
                && m.sender_id == incoming.sender_id
                && m.content == incoming.content
                && millis_between(m.timestamp, incoming.timestamp) < ECHO_MATCH_TOLERANCE_MS
        });

        if let Some(slot) = provisional_slot {
            debug!(room = %room, id = %incoming.id, "Echo replaced provisional entry");
            list[slot] = incoming;
            return EchoOutcome::ReplacedProvisional;
        }

        if list.iter().any(|m| m.id == incoming.id) {
            return EchoOutcome::Duplicate;
        }

        list.push(incoming);
        sort_messages(list);
        EchoOutcome::Appended
    }

    /// Remove a message outright (optimistic rollback on upload failure).
    pub fn remove(&mut self, room: &RoomId, id: &MessageId) -> bool {
        let Some(list) = self.rooms.get_mut(room) else {
            return false;
        };
        let before = list.len();
        list.retain(|m| &m.id != id);
        list.len() != before
    }

    /// One-way deletion transition: redact content, strip attachments.
    pub fn mark_deleted(&mut self, room: &RoomId, id: &str) -> bool {
        let Some(msg) = self
            .rooms
            .get_mut(room)
            .and_then(|list| list.iter_mut().find(|m| m.id.as_str() == id))
        else {
            return false;
        };
        if msg.deleted {
            return false;
        }
        msg.deleted = true;
        msg.content = DELETED_PLACEHOLDER.to_string();
        msg.attachment = None;
        true
    }

    /// Apply a read receipt from another reader.
    ///
    /// Receipts for messages not yet in the store are tolerated as no-ops;
    /// a reader already present is also a no-op. Returns whether anything
    /// changed.
    pub fn apply_receipt(&mut self, room: &RoomId, message_id: &str, reader: &UserId) -> bool {
        let Some(msg) = self
            .rooms
            .get_mut(room)
            .and_then(|list| list.iter_mut().find(|m| m.id.as_str() == message_id))
        else {
            debug!(room = %room, id = message_id, "Receipt for unknown message, ignoring");
            return false;
        };
        msg.read_by.insert(reader.clone())
    }

    /// Backfill an attachment URL that arrived after the message.
    pub fn backfill_attachment_url(&mut self, room: &RoomId, id: &str, url: String) -> bool {
        let Some(msg) = self
            .rooms
            .get_mut(room)
            .and_then(|list| list.iter_mut().find(|m| m.id.as_str() == id))
        else {
            return false;
        };
        match &mut msg.attachment {
            Some(att) if att.url.is_none() => {
                att.url = Some(url);
                true
            }
            _ => false,
        }
    }

    /// Timestamp of the newest message known locally for a room.
    pub fn latest_timestamp(&self, room: &RoomId) -> Option<DateTime<Utc>> {
        self.get(room).iter().map(|m| m.timestamp).max()
    }

    /// Messages in the room not yet read by `user`, excluding `user`'s own.
    pub fn unread_count_for(&self, room: &RoomId, user: &UserId) -> u32 {
        self.get(room)
            .iter()
            .filter(|m| m.counts_unread_for(user))
            .count() as u32
    }
}

/// Ascending timestamp; date separators sort before messages with the same
/// timestamp so the header renders above the day's first message.
fn sort_messages(messages: &mut [Message]) {
    messages.sort_by(|a, b| {
        a.timestamp.cmp(&b.timestamp).then_with(|| {
            let a_sep = a.classification == Classification::DateSeparator;
            let b_sep = b.classification == Classification::DateSeparator;
            b_sep.cmp(&a_sep)
        })
    });
}

fn millis_between(a: DateTime<Utc>, b: DateTime<Utc>) -> i64 {
    (a - b).num_milliseconds().abs()
}

/// Fold new information from a re-delivered record into the existing row.
fn update_in_place(existing: &mut Message, incoming: &Message) -> bool {
    let mut changed = false;

    if let (Some(cur), Some(new)) = (&mut existing.attachment, &incoming.attachment) {
        if cur.url.is_none() && new.url.is_some() {
            cur.url = new.url.clone();
            changed = true;
        }
    } else if existing.attachment.is_none() && incoming.attachment.is_some() && !incoming.deleted {
        existing.attachment = incoming.attachment.clone();
        changed = true;
    }

    for reader in &incoming.read_by {
        if existing.read_by.insert(reader.clone()) {
            changed = true;
        }
    }

    if incoming.deleted && !existing.deleted {
        existing.deleted = true;
        existing.content = incoming.content.clone();
        existing.attachment = None;
        changed = true;
    }

    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use std::collections::BTreeSet;
    use wardline_shared::Classification;

    fn room() -> RoomId {
        RoomId::new("r1")
    }

    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 7, 9, 0, 0).unwrap()
    }

    fn msg(id: MessageId, sender: &str, content: &str, ts: DateTime<Utc>) -> Message {
        Message {
            id,
            room_id: room(),
            sender_id: UserId::new(sender),
            sender_name: sender.to_string(),
            content: content.to_string(),
            timestamp: ts,
            read_by: BTreeSet::new(),
            attachment: None,
            participant_count_at_send: 3,
            classification: Classification::Normal,
            deleted: false,
        }
    }

    fn confirmed(id: &str, sender: &str, content: &str, ts: DateTime<Utc>) -> Message {
        msg(MessageId::confirmed(id), sender, content, ts)
    }

    #[test]
    fn merge_is_idempotent_on_ids() {
        let mut store = MessageStore::new();
        let a = confirmed("1", "u2", "a", base_time());
        let b = confirmed("2", "u2", "b", base_time() + Duration::seconds(1));

        assert_eq!(store.merge(&room(), vec![a.clone(), b.clone()]), 2);
        assert_eq!(store.merge(&room(), vec![a, b]), 0);
        assert_eq!(store.get(&room()).len(), 2);
    }

    #[test]
    fn redelivery_with_new_read_by_updates_in_place() {
        let mut store = MessageStore::new();
        let original = confirmed("1", "u2", "a", base_time());
        store.merge(&room(), vec![original.clone()]);

        let mut redelivered = original;
        redelivered.read_by.insert(UserId::new("u3"));
        assert_eq!(store.merge(&room(), vec![redelivered]), 0);

        let stored = &store.get(&room())[0];
        assert!(stored.read_by.contains(&UserId::new("u3")));
    }

    #[test]
    fn redelivery_backfills_attachment_url() {
        let mut store = MessageStore::new();
        let mut original = confirmed("1", "u2", "", base_time());
        original.attachment = Some(crate::model::Attachment {
            kind: "image".into(),
            url: None,
            name: Some("scan.png".into()),
        });
        store.merge(&room(), vec![original.clone()]);

        let mut redelivered = original;
        redelivered.attachment.as_mut().unwrap().url = Some("https://blobs/1".into());
        store.merge(&room(), vec![redelivered]);

        let stored = &store.get(&room())[0];
        assert_eq!(
            stored.attachment.as_ref().unwrap().url.as_deref(),
            Some("https://blobs/1")
        );
    }

    #[test]
    fn sorted_ascending_with_date_separators_first_on_ties() {
        let mut store = MessageStore::new();
        let ts = base_time();
        let mut separator = confirmed("sep", "system", "2025년 3월 7일", ts);
        separator.classification = Classification::DateSeparator;
        let normal = confirmed("1", "u2", "first of the day", ts);
        let later = confirmed("2", "u2", "later", ts + Duration::seconds(5));

        store.merge(&room(), vec![later, normal, separator]);
        let ids: Vec<&str> = store.get(&room()).iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["sep", "1", "2"]);
    }

    #[test]
    fn echo_replaces_provisional_in_slot() {
        let mut store = MessageStore::new();
        store.merge(&room(), vec![confirmed("1", "u2", "before", base_time())]);

        let me = UserId::new("u1");
        let provisional = msg(
            MessageId::new_provisional(&me),
            "u1",
            "hello",
            base_time() + Duration::seconds(10),
        );
        assert!(store.insert_provisional(provisional));
        let len_after_send = store.get(&room()).len();

        let echo = confirmed("987", "u1", "hello", base_time() + Duration::seconds(12));
        assert_eq!(store.reconcile_echo(&room(), echo), EchoOutcome::ReplacedProvisional);

        let list = store.get(&room());
        assert_eq!(list.len(), len_after_send);
        assert_eq!(list[1].id.as_str(), "987");
        assert!(!list.iter().any(|m| m.id.is_provisional()));
    }

    #[test]
    fn echo_outside_tolerance_appends_instead() {
        let mut store = MessageStore::new();
        let me = UserId::new("u1");
        let provisional = msg(MessageId::new_provisional(&me), "u1", "hello", base_time());
        store.insert_provisional(provisional);

        let echo = confirmed("987", "u1", "hello", base_time() + Duration::seconds(30));
        assert_eq!(store.reconcile_echo(&room(), echo), EchoOutcome::Appended);
        assert_eq!(store.get(&room()).len(), 2);
    }

    #[test]
    fn duplicate_echo_is_discarded() {
        let mut store = MessageStore::new();
        let echo = confirmed("987", "u1", "hello", base_time());
        assert_eq!(store.reconcile_echo(&room(), echo.clone()), EchoOutcome::Appended);
        assert_eq!(store.reconcile_echo(&room(), echo), EchoOutcome::Duplicate);
        assert_eq!(store.get(&room()).len(), 1);
    }

    #[test]
    fn double_submit_provisional_is_suppressed() {
        let mut store = MessageStore::new();
        let me = UserId::new("u1");
        let first = msg(MessageId::new_provisional(&me), "u1", "hello", base_time());
        let second = msg(
            MessageId::new_provisional(&me),
            "u1",
            "hello",
            base_time() + Duration::milliseconds(200),
        );

        assert!(store.insert_provisional(first));
        assert!(!store.insert_provisional(second));
        assert_eq!(store.get(&room()).len(), 1);
    }

    #[test]
    fn receipts_for_unknown_messages_are_no_ops() {
        let mut store = MessageStore::new();
        assert!(!store.apply_receipt(&room(), "missing", &UserId::new("u2")));

        store.merge(&room(), vec![confirmed("1", "u2", "a", base_time())]);
        assert!(store.apply_receipt(&room(), "1", &UserId::new("u3")));
        assert!(!store.apply_receipt(&room(), "1", &UserId::new("u3")));
    }

    #[test]
    fn deletion_is_one_way_and_redacts() {
        let mut store = MessageStore::new();
        let mut original = confirmed("1", "u2", "secret", base_time());
        original.attachment = Some(crate::model::Attachment {
            kind: "image".into(),
            url: Some("https://blobs/1".into()),
            name: None,
        });
        store.merge(&room(), vec![original]);

        assert!(store.mark_deleted(&room(), "1"));
        assert!(!store.mark_deleted(&room(), "1"));

        let stored = &store.get(&room())[0];
        assert!(stored.deleted);
        assert_eq!(stored.content, DELETED_PLACEHOLDER);
        assert!(stored.attachment.is_none());
    }

    #[test]
    fn unread_count_excludes_own_and_read_messages() {
        let me = UserId::new("u1");
        let mut store = MessageStore::new();
        let mine = confirmed("1", "u1", "mine", base_time());
        let unread = confirmed("2", "u2", "unread", base_time() + Duration::seconds(1));
        let mut read = confirmed("3", "u2", "read", base_time() + Duration::seconds(2));
        read.read_by.insert(me.clone());

        store.merge(&room(), vec![mine, unread, read]);
        assert_eq!(store.unread_count_for(&room(), &me), 1);
    }
}
