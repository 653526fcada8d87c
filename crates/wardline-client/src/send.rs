//! Outgoing message pipeline: optimistic insert, publish, rollback.
//!
//! A text send inserts a provisional entry into the timeline before the
//! frame leaves the process, so the sender sees their message instantly.
//! The provisional entry is replaced in place when the authoritative echo
//! arrives on the room channel; a failed publish rolls it back and hands
//! the content back to the embedder through [`ChatEvent::SendFailed`].
//! Sends are refused while the socket is offline, before anything is
//! inserted.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use wardline_net::{ChatApi, ConnectionHandle};
use wardline_shared::constants::SEND_DESTINATION;
use wardline_shared::preview::preview_text;
use wardline_shared::protocol::SendMessagePayload;
use wardline_shared::{Classification, ConnectionStatus, MessageId, RoomId, UserId};
use wardline_store::{Attachment, Message, RoomPatch};

use crate::error::{ClientError, Result};
use crate::events::ChatEvent;
use crate::state::EngineState;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "bmp"];

/// Publish a text message to `room`, optimistically inserting it first.
pub(crate) async fn send_text(
    conn: &ConnectionHandle,
    state: &Arc<Mutex<EngineState>>,
    events: &mpsc::UnboundedSender<ChatEvent>,
    room: &RoomId,
    user: &UserId,
    user_name: &str,
    content: &str,
) -> Result<()> {
    if content.trim().is_empty() {
        return Err(ClientError::SendRejected("empty message".into()));
    }

    // A frame handed to an offline socket would be dropped without an echo,
    // stranding the optimistic entry forever. Refuse up front instead; the
    // typed text goes back to the composer.
    let status = conn.status().await.unwrap_or(ConnectionStatus::Disconnected);
    if status != ConnectionStatus::Connected {
        warn!(room = %room, ?status, "Refusing send while the socket is offline");
        let _ = events.send(ChatEvent::SendFailed {
            room_id: room.clone(),
            content: content.to_owned(),
        });
        return Err(ClientError::SendRejected("push connection is offline".into()));
    }

    let timestamp = Utc::now();
    let (provisional_id, participant_count_at_send) = {
        let mut guard = state.lock().expect("state lock poisoned");
        let room_entry = guard
            .registry
            .get(room)
            .ok_or_else(|| ClientError::UnknownRoom(room.clone()))?;
        // Readers the message can still reach: everyone but the sender,
        // frozen at send time.
        let count = (room_entry.participants.len() as u32).saturating_sub(1);

        let message = provisional_message(room, user, user_name, content, count, None);
        let id = message.id.clone();
        if !guard.store.insert_provisional(message) {
            // Same content within the duplicate window; treat as done.
            debug!(room = %room, "Duplicate optimistic send suppressed");
            return Ok(());
        }
        guard
            .registry
            .merge(room, RoomPatch::preview(preview_text(None, content), 0));
        (id, count)
    };
    let _ = events.send(ChatEvent::MessagesChanged { room_id: room.clone() });
    let _ = events.send(ChatEvent::RoomsChanged);

    let payload = SendMessagePayload {
        room_id: room.as_str().to_owned(),
        sender: user.as_str().to_owned(),
        sender_name: user_name.to_owned(),
        sender_id: user.as_str().to_owned(),
        content: content.to_owned(),
        timestamp,
        participant_count_at_send,
    };
    let body = serde_json::to_value(&payload).expect("payload serializes");

    if let Err(e) = conn.publish(SEND_DESTINATION.to_owned(), body).await {
        warn!(room = %room, error = %e, "Publish failed, rolling back optimistic entry");
        rollback(state, events, room, &provisional_id, content);
        return Err(e.into());
    }
    Ok(())
}

/// Upload a file into `room`, with an optimistic placeholder entry while
/// the upload runs. The backend creates the real attachment message and
/// pushes it on the room channel; the placeholder is dropped either way.
pub(crate) async fn send_attachment(
    api: &ChatApi,
    state: &Arc<Mutex<EngineState>>,
    events: &mpsc::UnboundedSender<ChatEvent>,
    room: &RoomId,
    user: &UserId,
    user_name: &str,
    file_name: &str,
    bytes: Vec<u8>,
) -> Result<()> {
    let kind = attachment_kind(file_name);
    let provisional_id = {
        let mut guard = state.lock().expect("state lock poisoned");
        let room_entry = guard
            .registry
            .get(room)
            .ok_or_else(|| ClientError::UnknownRoom(room.clone()))?;
        let count = (room_entry.participants.len() as u32).saturating_sub(1);
        let attachment = Attachment {
            kind: kind.to_owned(),
            url: None,
            name: Some(file_name.to_owned()),
        };
        let message =
            provisional_message(room, user, user_name, file_name, count, Some(attachment));
        let id = message.id.clone();
        guard.store.insert_provisional(message);
        id
    };
    let _ = events.send(ChatEvent::MessagesChanged { room_id: room.clone() });

    let upload = api.upload_attachment(room, file_name, bytes).await;

    // The echo (or the failure) supersedes the placeholder in both cases.
    {
        let mut guard = state.lock().expect("state lock poisoned");
        guard.store.remove(room, &provisional_id);
    }

    match upload {
        Ok(()) => {
            let mut guard = state.lock().expect("state lock poisoned");
            guard
                .registry
                .merge(room, RoomPatch::preview(preview_text(Some(kind), ""), 0));
            drop(guard);
            let _ = events.send(ChatEvent::MessagesChanged { room_id: room.clone() });
            let _ = events.send(ChatEvent::RoomsChanged);
            Ok(())
        }
        Err(e) => {
            warn!(room = %room, file = %file_name, error = %e, "Attachment upload failed");
            let _ = events.send(ChatEvent::MessagesChanged { room_id: room.clone() });
            let _ = events.send(ChatEvent::SendFailed {
                room_id: room.clone(),
                content: file_name.to_owned(),
            });
            Err(e.into())
        }
    }
}

fn provisional_message(
    room: &RoomId,
    user: &UserId,
    user_name: &str,
    content: &str,
    participant_count_at_send: u32,
    attachment: Option<Attachment>,
) -> Message {
    let mut read_by = BTreeSet::new();
    read_by.insert(user.clone());
    Message {
        id: MessageId::new_provisional(user),
        room_id: room.clone(),
        sender_id: user.clone(),
        sender_name: user_name.to_owned(),
        content: content.to_owned(),
        timestamp: Utc::now(),
        read_by,
        attachment,
        participant_count_at_send,
        classification: Classification::Normal,
        deleted: false,
    }
}

fn rollback(
    state: &Arc<Mutex<EngineState>>,
    events: &mpsc::UnboundedSender<ChatEvent>,
    room: &RoomId,
    id: &MessageId,
    content: &str,
) {
    let mut guard = state.lock().expect("state lock poisoned");
    guard.store.remove(room, id);
    drop(guard);
    let _ = events.send(ChatEvent::MessagesChanged { room_id: room.clone() });
    let _ = events.send(ChatEvent::SendFailed {
        room_id: room.clone(),
        content: content.to_owned(),
    });
}

fn attachment_kind(file_name: &str) -> &'static str {
    let ext = file_name.rsplit('.').next().unwrap_or_default().to_lowercase();
    if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        "image"
    } else {
        "file"
    }
}
