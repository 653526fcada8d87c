//! Shared mutable engine state.
//!
//! Everything the bridge loop, the history loader, the read tracker and the
//! send pipeline agree on lives behind one mutex. Lock scopes stay short
//! and never span an await point.

use std::collections::{HashMap, HashSet};

use wardline_shared::{ConnectionStatus, RoomId};
use wardline_store::{MessageStore, PaginationCursor, RoomRegistry};

/// State shared by every engine component.
#[derive(Debug, Default)]
pub struct EngineState {
    /// All rooms the user belongs to.
    pub registry: RoomRegistry,
    /// Loaded message timelines, keyed by room.
    pub store: MessageStore,
    /// One pagination cursor per room with loaded history.
    pub cursors: HashMap<RoomId, PaginationCursor>,
    /// The room currently on screen, if any.
    pub active_room: Option<RoomId>,
    /// Rooms whose message and unread channels are subscribed.
    pub subscribed: HashSet<RoomId>,
    /// Last observed push connection status.
    pub status: ConnectionStatus,
}

impl EngineState {
    pub fn new() -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            ..Self::default()
        }
    }

    /// The cursor for `room`, created fresh on first access.
    pub fn cursor_mut(&mut self, room: &RoomId) -> &mut PaginationCursor {
        self.cursors.entry(room.clone()).or_default()
    }

    pub fn is_active(&self, room: &RoomId) -> bool {
        self.active_room.as_ref() == Some(room)
    }
}
