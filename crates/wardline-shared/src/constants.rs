/// Page size for paged history fetches.
pub const PAGE_SIZE: u32 = 100;

/// Minimum number of messages accumulated by the initial history load, so
/// the view has enough backlog for bidirectional scroll without a second
/// round trip.
pub const MIN_INITIAL_MESSAGES: usize = 20;

/// Fixed delay before a dropped push connection is re-established.
pub const RECONNECT_DELAY_SECS: u64 = 5;

/// Heartbeat interval on the push connection, in milliseconds.
pub const HEARTBEAT_MS: u64 = 4_000;

/// Window within which repeated mark-as-read calls for one room collapse
/// into a single backend call.
pub const READ_DEBOUNCE_MS: u64 = 1_000;

/// Tolerance when matching an authoritative echo against a provisional
/// (optimistic) message by sender/content/timestamp.
pub const ECHO_MATCH_TOLERANCE_MS: i64 = 5_000;

/// Window within which a second optimistic insert with identical sender and
/// content is treated as a duplicate and suppressed.
pub const OPTIMISTIC_DUPLICATE_WINDOW_MS: i64 = 1_000;

/// Upper bound on idempotence sets (already-notified ids, confirmed-read
/// ids) before they are evicted wholesale.
pub const IDEMPOTENCE_SET_CAP: usize = 1_000;

/// Maximum preview length before truncation with an ellipsis.
pub const PREVIEW_MAX_CHARS: usize = 50;

/// Prefix marking a locally generated provisional message id.
pub const PROVISIONAL_ID_PREFIX: &str = "local-";

/// Outbound publish destination for sending a chat message.
pub const SEND_DESTINATION: &str = "/app/chat.sendMessage";
