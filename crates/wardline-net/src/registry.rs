//! Process-wide registry of live socket connections.
//!
//! The chat backend keys its push session on the authenticated user, so the
//! process holds at most one socket per user. Acquiring a handle for a user
//! that already has a running task reuses it; the task is only torn down
//! when the user is released (logout) or the process exits.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info};

use wardline_shared::protocol::Channel;
use wardline_shared::ConnectionStatus;

use crate::error::{NetError, Result};
use crate::socket::{spawn_socket, SocketCommand, SocketConfig, SocketNotification};

/// A cloneable handle to a running socket task.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    cmd_tx: mpsc::Sender<SocketCommand>,
    notif_tx: broadcast::Sender<SocketNotification>,
}

impl ConnectionHandle {
    /// Open a fresh notification stream on this connection.
    ///
    /// Each receiver sees every notification from the moment it subscribes;
    /// events before that are not replayed.
    pub fn events(&self) -> broadcast::Receiver<SocketNotification> {
        self.notif_tx.subscribe()
    }

    /// Whether the socket task is still running.
    pub fn is_alive(&self) -> bool {
        !self.cmd_tx.is_closed()
    }

    pub async fn subscribe(&self, channel: Channel) -> Result<()> {
        self.send(SocketCommand::Subscribe(channel)).await
    }

    pub async fn unsubscribe(&self, channel: Channel) -> Result<()> {
        self.send(SocketCommand::Unsubscribe(channel)).await
    }

    pub async fn publish(&self, destination: String, body: serde_json::Value) -> Result<()> {
        self.send(SocketCommand::Publish { destination, body }).await
    }

    pub async fn update_credential(&self, token: String) -> Result<()> {
        self.send(SocketCommand::UpdateCredential(token)).await
    }

    pub async fn status(&self) -> Result<ConnectionStatus> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(SocketCommand::GetStatus(reply_tx)).await?;
        reply_rx.await.map_err(|_| NetError::SocketClosed)
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(SocketCommand::Shutdown).await
    }

    async fn send(&self, cmd: SocketCommand) -> Result<()> {
        self.cmd_tx.send(cmd).await.map_err(|_| NetError::SocketClosed)
    }
}

/// Registry of socket connections, one per user key.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<String, ConnectionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry instance.
    pub fn global() -> &'static ConnectionRegistry {
        static GLOBAL: OnceLock<ConnectionRegistry> = OnceLock::new();
        GLOBAL.get_or_init(ConnectionRegistry::new)
    }

    /// Get the live connection for `user_key`, spawning one if none exists.
    ///
    /// A handle whose task has exited (command channel closed) counts as
    /// absent and is replaced.
    pub fn acquire(&self, user_key: &str, config: SocketConfig) -> ConnectionHandle {
        let mut connections = self.connections.lock().expect("registry lock poisoned");

        if let Some(handle) = connections.get(user_key) {
            if handle.is_alive() {
                debug!(user = %user_key, "Reusing existing socket connection");
                return handle.clone();
            }
        }

        info!(user = %user_key, "Spawning socket connection");
        let (cmd_tx, notif_tx) = spawn_socket(config);
        let handle = ConnectionHandle { cmd_tx, notif_tx };
        connections.insert(user_key.to_owned(), handle.clone());
        handle
    }

    /// Look up the connection for `user_key` without spawning.
    pub fn get(&self, user_key: &str) -> Option<ConnectionHandle> {
        let connections = self.connections.lock().expect("registry lock poisoned");
        connections.get(user_key).filter(|h| h.is_alive()).cloned()
    }

    /// Tear down and forget the connection for `user_key`, if any.
    pub async fn release(&self, user_key: &str) {
        let handle = {
            let mut connections = self.connections.lock().expect("registry lock poisoned");
            connections.remove(user_key)
        };
        if let Some(handle) = handle {
            info!(user = %user_key, "Releasing socket connection");
            let _ = handle.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> SocketConfig {
        SocketConfig::new("ws://127.0.0.1:1", "token")
    }

    #[tokio::test]
    async fn acquire_reuses_live_connection() {
        let registry = ConnectionRegistry::new();
        let first = registry.acquire("u1", test_config());
        let second = registry.acquire("u1", test_config());
        assert!(first.cmd_tx.same_channel(&second.cmd_tx));
    }

    #[tokio::test]
    async fn distinct_users_get_distinct_connections() {
        let registry = ConnectionRegistry::new();
        let a = registry.acquire("u1", test_config());
        let b = registry.acquire("u2", test_config());
        assert!(!a.cmd_tx.same_channel(&b.cmd_tx));
    }

    #[tokio::test]
    async fn release_forgets_the_connection() {
        let registry = ConnectionRegistry::new();
        registry.acquire("u1", test_config());
        registry.release("u1").await;
        assert!(registry.get("u1").is_none());
    }
}
