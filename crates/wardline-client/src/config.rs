//! Engine configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the engine can start with zero
//! configuration against a local backend.

use std::path::PathBuf;
use std::time::Duration;

use wardline_shared::constants::{
    MIN_INITIAL_MESSAGES, PAGE_SIZE, READ_DEBOUNCE_MS, RECONNECT_DELAY_SECS,
};

/// Chat engine configuration.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Base URL of the chat REST API.
    /// Env: `WARDLINE_API_URL`
    /// Default: `http://127.0.0.1:8080`
    pub api_url: String,

    /// Websocket endpoint of the push socket.
    /// Env: `WARDLINE_WS_URL`
    /// Default: `ws://127.0.0.1:8080/ws`
    pub socket_url: String,

    /// Directory where confirmed-read markers are persisted.
    /// Env: `WARDLINE_DATA_DIR`
    /// Default: `./wardline-data`
    pub data_dir: PathBuf,

    /// Messages per history page.
    pub page_size: u32,

    /// Minimum number of messages the initial history load settles with.
    pub min_initial_messages: usize,

    /// Delay between socket reconnect attempts.
    pub reconnect_delay: Duration,

    /// Debounce applied to read-marking the active room.
    pub read_debounce: Duration,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:8080".to_string(),
            socket_url: "ws://127.0.0.1:8080/ws".to_string(),
            data_dir: PathBuf::from("./wardline-data"),
            page_size: PAGE_SIZE,
            min_initial_messages: MIN_INITIAL_MESSAGES,
            reconnect_delay: Duration::from_secs(RECONNECT_DELAY_SECS),
            read_debounce: Duration::from_millis(READ_DEBOUNCE_MS),
        }
    }
}

impl ChatConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("WARDLINE_API_URL") {
            config.api_url = url;
        }

        if let Ok(url) = std::env::var("WARDLINE_WS_URL") {
            config.socket_url = url;
        }

        if let Ok(dir) = std::env::var("WARDLINE_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_use_protocol_constants() {
        let config = ChatConfig::default();
        assert_eq!(config.page_size, PAGE_SIZE);
        assert_eq!(config.min_initial_messages, MIN_INITIAL_MESSAGES);
        assert_eq!(config.read_debounce, Duration::from_millis(READ_DEBOUNCE_MS));
    }
}
