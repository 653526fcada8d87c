//! Message classification from wire flags and content markers.
//!
//! The backend flags invite/exit/date-separator messages explicitly on some
//! paths but not all, so classification also falls back to the content
//! markers the server embeds: the invitation keyword, the room-exit phrase,
//! and the date-header pattern.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Invitation keyword embedded in system-generated invite messages.
pub const INVITE_MARKER: &str = "초대";

/// Phrase embedded in system-generated room-exit messages.
pub const EXIT_MARKER: &str = "나갔습니다";

/// What kind of entry a message renders as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Classification {
    Normal,
    Invite,
    Exit,
    DateSeparator,
    System,
}

impl Classification {
    /// Whether this message counts toward read tracking. Invite/exit notices
    /// and date separators are never marked read.
    pub fn is_readable(self) -> bool {
        matches!(self, Self::Normal)
    }
}

fn date_header_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\d{4}년 \d{1,2}월 \d{1,2}일").expect("valid date-header pattern")
    })
}

/// Classify a message from its wire flags and content.
///
/// Explicit flags win; content markers are the fallback for older records
/// that predate the flags.
pub fn classify(content: &str, is_invite: bool, is_exit: bool, is_date: bool) -> Classification {
    if is_date || date_header_pattern().is_match(content) {
        Classification::DateSeparator
    } else if is_invite || content.contains(INVITE_MARKER) {
        Classification::Invite
    } else if is_exit || content.contains(EXIT_MARKER) {
        Classification::Exit
    } else {
        Classification::Normal
    }
}
