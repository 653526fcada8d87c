//! Error types for the network layer.

use thiserror::Error;

use wardline_shared::RoomId;

pub type Result<T> = std::result::Result<T, NetError>;

/// Errors produced by the socket task and the REST client.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("websocket error: {0}")]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),

    #[error(transparent)]
    Wire(#[from] wardline_shared::WireError),

    /// The server rejected the bearer credential (HTTP 401).
    #[error("credential rejected by the server")]
    CredentialExpired,

    /// The server refused access to a room (HTTP 403).
    #[error("access to room {0} denied")]
    PermissionDenied(RoomId),

    #[error("unexpected status {status} from {path}")]
    UnexpectedStatus { status: u16, path: String },

    /// The socket task has terminated and no longer accepts commands.
    #[error("connection task is not running")]
    SocketClosed,
}
