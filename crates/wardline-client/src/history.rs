//! History loading: the initial backward walk and older-page fetches.
//!
//! History is paged oldest-first on the backend. The initial load probes
//! page 0 for the page count, then walks backward from the last page until
//! enough messages are on hand; subsequent calls pull one older page at a
//! time, guarded by the room's single-flight cursor.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use wardline_net::ChatApi;
use wardline_shared::protocol::RawMessage;
use wardline_shared::{RoomId, UserId};
use wardline_store::{Message, RoomPatch};

use crate::error::Result;
use crate::events::ChatEvent;
use crate::state::EngineState;

const SORT_OLDEST_FIRST: &str = "timestamp,asc";
const SORT_NEWEST_FIRST: &str = "timestamp,desc";

/// Load the initial window of a room's history.
///
/// Settles with at least `min_initial` messages unless the room holds fewer
/// in total. An empty room settles immediately with an empty timeline.
/// Results are dropped if the user has navigated away in the meantime.
pub(crate) async fn load_initial(
    api: &ChatApi,
    state: &Arc<Mutex<EngineState>>,
    events: &mpsc::UnboundedSender<ChatEvent>,
    room: &RoomId,
    user: &UserId,
    page_size: u32,
    min_initial: usize,
) -> Result<()> {
    {
        let mut guard = state.lock().expect("state lock poisoned");
        if !guard.cursor_mut(room).begin_fetch() {
            debug!(room = %room, "Initial load already in flight");
            return Ok(());
        }
    }

    let meta = match api
        .get_messages(room, user, 0, page_size, SORT_NEWEST_FIRST)
        .await
    {
        Ok(meta) => meta,
        Err(e) => {
            end_fetch(state, room);
            return Err(e.into());
        }
    };
    let total_pages = meta.total_pages;

    if total_pages == 0 {
        let mut guard = state.lock().expect("state lock poisoned");
        guard.store.replace(room, Vec::new());
        let cursor = guard.cursor_mut(room);
        cursor.current_page = 0;
        cursor.total_pages = 0;
        cursor.end_fetch();
        drop(guard);
        info!(room = %room, "Room history is empty");
        let _ = events.send(ChatEvent::MessagesChanged { room_id: room.clone() });
        return Ok(());
    }

    // Walk backward from the last page until enough messages are on hand.
    let mut raw: Vec<RawMessage> = Vec::new();
    let mut page = total_pages as i64 - 1;
    while page >= 0 && raw.len() < min_initial {
        let resp = match api
            .get_messages(room, user, page as u32, page_size, SORT_OLDEST_FIRST)
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                end_fetch(state, room);
                return Err(e.into());
            }
        };
        let mut older = resp.content;
        older.append(&mut raw);
        raw = older;
        page -= 1;
    }
    let oldest_loaded_page = page + 1;

    let messages: Vec<Message> = raw
        .into_iter()
        .map(|m| Message::from_raw(m, room, user))
        .collect();

    let total_unread = {
        let mut guard = state.lock().expect("state lock poisoned");
        if !guard.is_active(room) {
            // Navigated away during the walk; keep whatever the new room loads.
            guard.cursor_mut(room).end_fetch();
            debug!(room = %room, "Dropping stale history load");
            return Ok(());
        }

        guard.store.replace(room, messages);
        let cursor = guard.cursor_mut(room);
        cursor.current_page = oldest_loaded_page;
        cursor.total_pages = total_pages;
        cursor.end_fetch();

        // The loaded window may not cover every unread message, so a badge
        // derived from it can only raise, never lower, the preserved one.
        let derived = guard.store.unread_count_for(room, user);
        let preserved = guard.registry.get(room).map(|r| r.unread_count).unwrap_or(0);
        let badge = derived.max(preserved);
        guard.registry.merge(room, RoomPatch::unread(badge));
        guard.registry.total_unread()
    };

    info!(room = %room, pages = total_pages, "Initial history loaded");
    let _ = events.send(ChatEvent::MessagesChanged { room_id: room.clone() });
    let _ = events.send(ChatEvent::RoomsChanged);
    let _ = events.send(ChatEvent::TotalUnreadChanged(total_unread));
    Ok(())
}

/// Fetch the next older page for `room`, if any.
///
/// Returns the number of messages actually added. `Ok(0)` without touching
/// the network when the initial load has not run, no older pages remain,
/// or a fetch is already in flight.
pub(crate) async fn load_older(
    api: &ChatApi,
    state: &Arc<Mutex<EngineState>>,
    events: &mpsc::UnboundedSender<ChatEvent>,
    room: &RoomId,
    user: &UserId,
    page_size: u32,
) -> Result<usize> {
    let next_page = {
        let mut guard = state.lock().expect("state lock poisoned");
        let cursor = guard.cursor_mut(room);
        if cursor.is_undetermined() || !cursor.has_more() || !cursor.begin_fetch() {
            return Ok(0);
        }
        cursor.current_page - 1
    };

    let resp = match api
        .get_messages(room, user, next_page as u32, page_size, SORT_OLDEST_FIRST)
        .await
    {
        Ok(resp) => resp,
        Err(e) => {
            warn!(room = %room, page = next_page, error = %e, "Older-page fetch failed");
            end_fetch(state, room);
            return Err(e.into());
        }
    };

    let messages: Vec<Message> = resp
        .content
        .into_iter()
        .map(|m| Message::from_raw(m, room, user))
        .collect();

    let added = {
        let mut guard = state.lock().expect("state lock poisoned");
        if !guard.is_active(room) {
            guard.cursor_mut(room).end_fetch();
            return Ok(0);
        }
        let added = guard.store.merge(room, messages);
        let cursor = guard.cursor_mut(room);
        cursor.current_page = next_page;
        cursor.end_fetch();
        added
    };

    debug!(room = %room, page = next_page, added, "Older page loaded");
    if added > 0 {
        let _ = events.send(ChatEvent::MessagesChanged { room_id: room.clone() });
    }
    Ok(added)
}

fn end_fetch(state: &Arc<Mutex<EngineState>>, room: &RoomId) {
    let mut guard = state.lock().expect("state lock poisoned");
    guard.cursor_mut(room).end_fetch();
}
