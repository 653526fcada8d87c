//! Events the engine emits toward its embedder (UI layer, shell, tests).
//!
//! The engine itself never renders anything; every observable change is
//! announced here and the embedder re-reads the state it cares about.

use wardline_shared::{ConnectionStatus, RoomId};

/// A state change announced by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// The push connection status changed.
    ConnectionChanged(ConnectionStatus),
    /// The room list (order, badges, previews, membership) changed.
    RoomsChanged,
    /// The message timeline of one room changed.
    MessagesChanged { room_id: RoomId },
    /// The sum of unread badges changed.
    TotalUnreadChanged(u32),
    /// A message in a non-active room warrants a user-facing notification.
    Notify {
        room_id: RoomId,
        message_id: String,
        title: String,
        body: String,
    },
    /// An outgoing message could not be handed to the backend. The content
    /// is returned so the embedder can restore it into the composer.
    SendFailed { room_id: RoomId, content: String },
    /// The bearer credential was rejected; the session must re-authenticate.
    CredentialsInvalid,
    /// The backend refused access to a room the user tried to open.
    AccessDenied { room_id: RoomId },
}
