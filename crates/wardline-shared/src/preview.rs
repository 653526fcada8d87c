//! Room-list preview text derivation.

use crate::constants::PREVIEW_MAX_CHARS;

/// Preview placeholder for an image attachment.
pub const PREVIEW_IMAGE: &str = "📷 사진";

/// Preview placeholder for any other attachment.
pub const PREVIEW_FILE: &str = "📄 파일";

/// Derive the room-list preview for a message: attachment placeholders for
/// attachment messages, otherwise the content truncated to
/// [`PREVIEW_MAX_CHARS`] characters with an ellipsis.
pub fn preview_text(attachment_type: Option<&str>, content: &str) -> String {
    match attachment_type {
        Some("image") => PREVIEW_IMAGE.to_string(),
        Some(_) => PREVIEW_FILE.to_string(),
        None => {
            let chars: Vec<char> = content.chars().collect();
            if chars.len() > PREVIEW_MAX_CHARS {
                format!("{}...", chars[..PREVIEW_MAX_CHARS].iter().collect::<String>())
            } else {
                content.to_string()
            }
        }
    }
}
