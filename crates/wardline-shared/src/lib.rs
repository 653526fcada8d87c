//! # wardline-shared
//!
//! Domain types and the backend wire contract shared by every Wardline
//! crate: room/user/message identifiers, the JSON payloads exchanged with
//! the messaging backend over REST and over the push socket, message
//! classification, and the tuning constants of the synchronization engine.

pub mod classify;
pub mod constants;
pub mod preview;
pub mod protocol;
pub mod types;

mod error;

pub use classify::Classification;
pub use error::WireError;
pub use types::{ConnectionStatus, MessageId, RoomId, UserId};
