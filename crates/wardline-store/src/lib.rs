//! # wardline-store
//!
//! In-memory session state of the synchronization engine: the Room Registry,
//! the per-room Message Store, pagination cursors, and the file-backed
//! read-marker cache (the only state that touches disk; chat history itself
//! lives for the session only).
//!
//! Every mutation of shared state is expressed as a pure merge over the
//! previous value, so two components updating the same room in one tick
//! cannot lose each other's writes.

pub mod cursor;
pub mod messages;
pub mod model;
pub mod read_cache;
pub mod rooms;

mod error;

pub use cursor::PaginationCursor;
pub use error::StoreError;
pub use messages::{EchoOutcome, MessageStore};
pub use model::{Attachment, Message, Participant};
pub use read_cache::ReadMarkerCache;
pub use rooms::{Room, RoomPatch, RoomRegistry};
