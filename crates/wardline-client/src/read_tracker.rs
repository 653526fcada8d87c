//! Read tracking: debounced read calls, badge zeroing, and reconnect
//! reconciliation.
//!
//! Reads for the active room are debounced so a burst of incoming messages
//! produces one backend call. Timers are keyed per room and deliberately
//! survive room switches: navigating away must not lose a pending read of
//! the room just left.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use wardline_net::ChatApi;
use wardline_shared::{RoomId, UserId};
use wardline_store::{ReadMarkerCache, RoomPatch};

use crate::error::Result;
use crate::events::ChatEvent;
use crate::state::EngineState;

/// Debounced read marking for the active room.
#[derive(Debug, Clone)]
pub struct ReadTracker {
    api: ChatApi,
    state: Arc<Mutex<EngineState>>,
    events: mpsc::UnboundedSender<ChatEvent>,
    user: UserId,
    data_dir: PathBuf,
    debounce: Duration,
    timers: Arc<Mutex<HashMap<RoomId, JoinHandle<()>>>>,
}

impl ReadTracker {
    pub fn new(
        api: ChatApi,
        state: Arc<Mutex<EngineState>>,
        events: mpsc::UnboundedSender<ChatEvent>,
        user: UserId,
        data_dir: PathBuf,
        debounce: Duration,
    ) -> Self {
        Self {
            api,
            state,
            events,
            user,
            data_dir,
            debounce,
            timers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// (Re)start the debounce timer for `room`. Each call pushes the read
    /// further out; the backend call fires once the room stays quiet for
    /// the full debounce window.
    pub fn schedule(&self, room: RoomId) {
        let tracker = self.clone();
        let task_room = room.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(tracker.debounce).await;
            if let Err(e) = tracker.flush(&task_room).await {
                warn!(room = %task_room, error = %e, "Debounced read call failed");
            }
        });

        let mut timers = self.timers.lock().expect("timer lock poisoned");
        if let Some(previous) = timers.insert(room, handle) {
            previous.abort();
        }
    }

    /// Mark `room` read immediately, bypassing the debounce. Used on room
    /// entry.
    pub async fn mark_now(&self, room: &RoomId) -> Result<()> {
        self.cancel(room);
        self.flush(room).await
    }

    /// Whether a read for `message_id` was already confirmed to the
    /// backend in an earlier session.
    pub fn is_confirmed_read(&self, room: &RoomId, message_id: &str) -> bool {
        match ReadMarkerCache::open(&self.data_dir, room, &self.user) {
            Ok(cache) => cache.is_read(message_id),
            Err(_) => false,
        }
    }

    /// Re-fetch authoritative unread counts for every room still carrying
    /// a badge, except the active one (its badge is being zeroed locally).
    /// Called after a reconnect, when broadcasts may have been missed.
    pub async fn reconcile_with_server(&self) {
        let rooms: Vec<RoomId> = {
            let guard = self.state.lock().expect("state lock poisoned");
            guard
                .registry
                .rooms()
                .iter()
                .filter(|r| r.unread_count > 0 && !guard.is_active(&r.id))
                .map(|r| r.id.clone())
                .collect()
        };
        if rooms.is_empty() {
            return;
        }

        let mut changed = false;
        for room in rooms {
            match self.api.unread_count(&room).await {
                Ok(count) => {
                    let mut guard = self.state.lock().expect("state lock poisoned");
                    guard.registry.merge(&room, RoomPatch::unread(count));
                    changed = true;
                }
                Err(e) => {
                    debug!(room = %room, error = %e, "Unread reconciliation fetch failed");
                }
            }
        }

        if changed {
            let total = {
                let guard = self.state.lock().expect("state lock poisoned");
                guard.registry.total_unread()
            };
            info!(total, "Unread badges reconciled with server");
            let _ = self.events.send(ChatEvent::RoomsChanged);
            let _ = self.events.send(ChatEvent::TotalUnreadChanged(total));
        }
    }

    /// Abort every pending timer. Called on logout.
    pub fn abort_all(&self) {
        let mut timers = self.timers.lock().expect("timer lock poisoned");
        for (_, handle) in timers.drain() {
            handle.abort();
        }
    }

    fn cancel(&self, room: &RoomId) {
        let mut timers = self.timers.lock().expect("timer lock poisoned");
        if let Some(handle) = timers.remove(room) {
            handle.abort();
        }
    }

    /// Issue the backend read call, then fold the read into local state:
    /// the badge drops to zero and every loaded message gains our receipt.
    async fn flush(&self, room: &RoomId) -> Result<()> {
        self.api.mark_read(room, &self.user).await?;

        let (message_ids, total) = {
            let mut guard = self.state.lock().expect("state lock poisoned");
            let ids: Vec<String> = guard
                .store
                .get(room)
                .iter()
                .filter(|m| !m.id.is_provisional())
                .map(|m| m.id.as_str().to_owned())
                .collect();
            for id in &ids {
                guard.store.apply_receipt(room, id, &self.user);
            }
            guard.registry.merge(room, RoomPatch::unread(0));
            (ids, guard.registry.total_unread())
        };

        // Persist confirmed reads outside the state lock.
        if let Ok(mut cache) = ReadMarkerCache::open(&self.data_dir, room, &self.user) {
            for id in &message_ids {
                if let Err(e) = cache.mark(id) {
                    warn!(room = %room, error = %e, "Read-marker persist failed");
                    break;
                }
            }
        }

        debug!(room = %room, marked = message_ids.len(), "Room marked read");
        let _ = self.events.send(ChatEvent::MessagesChanged { room_id: room.clone() });
        let _ = self.events.send(ChatEvent::RoomsChanged);
        let _ = self.events.send(ChatEvent::TotalUnreadChanged(total));
        Ok(())
    }
}
