// Chat synchronization engine for the hospital client: room registry,
// history, read tracking, sends, and global fan-out over one push socket.

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod fanout;
pub mod history;
pub mod read_tracker;
pub mod send;
pub mod state;

pub use config::ChatConfig;
pub use engine::ChatEngine;
pub use error::{ClientError, Result};
pub use events::ChatEvent;
pub use read_tracker::ReadTracker;
pub use state::EngineState;

use tracing_subscriber::{fmt, EnvFilter};

/// Initialize structured logging for an embedding application.
///
/// `RUST_LOG` overrides the default filter. Safe to call once per process.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("wardline_client=debug,wardline_net=debug,wardline_store=info,warn")
    });

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
