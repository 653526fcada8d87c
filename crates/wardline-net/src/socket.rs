//! Push socket connection task with tokio mpsc command/notification pattern.
//!
//! The websocket loop runs in a dedicated tokio task. External code
//! communicates with it through a typed command channel and listens on a
//! broadcast notification channel, so any number of consumers can observe
//! connection state and pushed events without owning the socket.
//!
//! The task reconnects forever on a fixed delay and replays the tracked
//! subscription set after every successful handshake, so consumers never
//! have to re-subscribe themselves.

use std::collections::HashSet;
use std::time::Duration;

use futures::{Sink, SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};

use wardline_shared::constants::{HEARTBEAT_MS, RECONNECT_DELAY_SECS};
use wardline_shared::protocol::{Channel, ClientFrame, PushEvent, ServerFrame};
use wardline_shared::ConnectionStatus;

// ---------------------------------------------------------------------------
// Command / notification types
// ---------------------------------------------------------------------------

/// Commands sent *into* the socket task.
#[derive(Debug)]
pub enum SocketCommand {
    /// Subscribe to a push channel. Tracked and replayed on reconnect.
    Subscribe(Channel),
    /// Unsubscribe from a push channel.
    Unsubscribe(Channel),
    /// Publish an application frame to the given destination.
    Publish {
        destination: String,
        body: serde_json::Value,
    },
    /// Swap the bearer credential used for the handshake and outgoing sends.
    UpdateCredential(String),
    /// Request the current connection status.
    GetStatus(oneshot::Sender<ConnectionStatus>),
    /// Gracefully shut down the socket task.
    Shutdown,
}

/// Notifications sent *from* the socket task to its subscribers.
#[derive(Debug, Clone)]
pub enum SocketNotification {
    /// The connection status changed.
    StatusChanged(ConnectionStatus),
    /// A push event arrived on a subscribed channel.
    Event(PushEvent),
}

/// Configuration for spawning the socket task.
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// Websocket endpoint of the chat backend.
    pub url: String,
    /// Bearer token presented on the handshake.
    pub credential: String,
    /// Delay between reconnect attempts.
    pub reconnect_delay: Duration,
    /// Interval between keepalive pings.
    pub heartbeat: Duration,
}

impl SocketConfig {
    pub fn new(url: impl Into<String>, credential: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            credential: credential.into(),
            reconnect_delay: Duration::from_secs(RECONNECT_DELAY_SECS),
            heartbeat: Duration::from_millis(HEARTBEAT_MS),
        }
    }
}

/// Spawn the push socket in a background tokio task.
///
/// Returns the command sender and the broadcast handle for notifications.
/// Call [`broadcast::Sender::subscribe`] on the latter for each consumer.
pub fn spawn_socket(
    config: SocketConfig,
) -> (
    mpsc::Sender<SocketCommand>,
    broadcast::Sender<SocketNotification>,
) {
    let (cmd_tx, cmd_rx) = mpsc::channel::<SocketCommand>(256);
    let (notif_tx, _) = broadcast::channel::<SocketNotification>(256);

    let task_notif = notif_tx.clone();
    tokio::spawn(async move {
        run_socket(config, cmd_rx, task_notif).await;
        info!("Socket event loop terminated");
    });

    (cmd_tx, notif_tx)
}

/// Connection loop state carried across reconnects.
struct SocketState {
    credential: String,
    subscriptions: HashSet<Channel>,
    status: ConnectionStatus,
}

impl SocketState {
    fn set_status(&mut self, status: ConnectionStatus, notif: &broadcast::Sender<SocketNotification>) {
        if self.status != status {
            self.status = status;
            let _ = notif.send(SocketNotification::StatusChanged(status));
        }
    }
}

async fn run_socket(
    config: SocketConfig,
    mut cmd_rx: mpsc::Receiver<SocketCommand>,
    notif_tx: broadcast::Sender<SocketNotification>,
) {
    let mut state = SocketState {
        credential: config.credential.clone(),
        subscriptions: HashSet::new(),
        status: ConnectionStatus::Disconnected,
    };

    loop {
        state.set_status(ConnectionStatus::Connecting, &notif_tx);

        let stream = match connect(&config.url, &state.credential).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(url = %config.url, error = %e, "Socket connect failed");
                state.set_status(ConnectionStatus::Error, &notif_tx);
                if !idle_until_reconnect(&mut cmd_rx, &mut state, config.reconnect_delay).await {
                    return;
                }
                continue;
            }
        };

        info!(url = %config.url, "Socket connected");
        let (mut sink, mut source) = stream.split();

        // Replay the tracked subscription set on the fresh connection.
        let mut replay_failed = false;
        for channel in &state.subscriptions {
            let frame = ClientFrame::Subscribe {
                destination: channel.destination(),
            };
            if let Err(e) = send_frame(&mut sink, &frame).await {
                warn!(error = %e, "Subscription replay failed");
                replay_failed = true;
                break;
            }
        }
        if replay_failed {
            state.set_status(ConnectionStatus::Disconnected, &notif_tx);
            if !idle_until_reconnect(&mut cmd_rx, &mut state, config.reconnect_delay).await {
                return;
            }
            continue;
        }

        state.set_status(ConnectionStatus::Connected, &notif_tx);

        let mut heartbeat = tokio::time::interval(config.heartbeat);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        heartbeat.tick().await; // first tick fires immediately

        // Connected loop. Breaks back into the reconnect loop on any
        // transport failure.
        let shutdown = loop {
            tokio::select! {
                // --- Incoming commands ---
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(SocketCommand::Subscribe(channel)) => {
                            let frame = ClientFrame::Subscribe {
                                destination: channel.destination(),
                            };
                            state.subscriptions.insert(channel);
                            if let Err(e) = send_frame(&mut sink, &frame).await {
                                error!(error = %e, "Subscribe send failed");
                                break false;
                            }
                        }
                        Some(SocketCommand::Unsubscribe(channel)) => {
                            let frame = ClientFrame::Unsubscribe {
                                destination: channel.destination(),
                            };
                            state.subscriptions.remove(&channel);
                            if let Err(e) = send_frame(&mut sink, &frame).await {
                                error!(error = %e, "Unsubscribe send failed");
                                break false;
                            }
                        }
                        Some(SocketCommand::Publish { destination, body }) => {
                            let frame = ClientFrame::Send {
                                destination,
                                authorization: Some(format!("Bearer {}", state.credential)),
                                body,
                            };
                            if let Err(e) = send_frame(&mut sink, &frame).await {
                                error!(error = %e, "Publish send failed");
                                break false;
                            }
                        }
                        Some(SocketCommand::UpdateCredential(token)) => {
                            debug!("Socket credential updated");
                            state.credential = token;
                        }
                        Some(SocketCommand::GetStatus(reply)) => {
                            let _ = reply.send(state.status);
                        }
                        Some(SocketCommand::Shutdown) => {
                            info!("Socket shutdown requested");
                            let _ = sink.send(WsMessage::Close(None)).await;
                            break true;
                        }
                        None => {
                            info!("Command channel closed, shutting down socket");
                            break true;
                        }
                    }
                }

                // --- Incoming frames ---
                frame = source.next() => {
                    match frame {
                        Some(Ok(WsMessage::Text(text))) => {
                            handle_text(&text, &notif_tx);
                        }
                        Some(Ok(WsMessage::Ping(payload))) => {
                            if sink.send(WsMessage::Pong(payload)).await.is_err() {
                                break false;
                            }
                        }
                        Some(Ok(WsMessage::Close(_))) | None => {
                            info!("Socket closed by server");
                            break false;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!(error = %e, "Socket read error");
                            break false;
                        }
                    }
                }

                // --- Keepalive ---
                _ = heartbeat.tick() => {
                    if sink.send(WsMessage::Ping(Vec::new())).await.is_err() {
                        break false;
                    }
                }
            }
        };

        state.set_status(ConnectionStatus::Disconnected, &notif_tx);
        if shutdown {
            return;
        }
        if !idle_until_reconnect(&mut cmd_rx, &mut state, config.reconnect_delay).await {
            return;
        }
    }
}

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

async fn connect(url: &str, credential: &str) -> crate::error::Result<WsStream> {
    let mut request = url.into_client_request()?;
    let bearer = HeaderValue::from_str(&format!("Bearer {credential}"))
        .map_err(|_| crate::NetError::CredentialExpired)?;
    request.headers_mut().insert(AUTHORIZATION, bearer);
    let (stream, _) = tokio_tungstenite::connect_async(request).await?;
    Ok(stream)
}

async fn send_frame(
    sink: &mut (impl Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error> + Unpin),
    frame: &ClientFrame,
) -> crate::error::Result<()> {
    let text = serde_json::to_string(frame).map_err(wardline_shared::WireError::from)?;
    sink.send(WsMessage::Text(text)).await?;
    Ok(())
}

/// Decode an incoming text frame and fan it out as a notification.
/// Malformed frames and unknown destinations are logged and dropped.
fn handle_text(text: &str, notif_tx: &broadcast::Sender<SocketNotification>) {
    let frame: ServerFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(error = %e, "Dropping malformed server frame");
            return;
        }
    };
    let ServerFrame::Message { destination, body } = frame;
    match PushEvent::decode(&destination, body) {
        Ok(event) => {
            debug!(destination = %destination, "Push event received");
            let _ = notif_tx.send(SocketNotification::Event(event));
        }
        Err(e) => {
            warn!(destination = %destination, error = %e, "Dropping undecodable push event");
        }
    }
}

/// Sleep out the reconnect delay while still servicing commands, so
/// subscription changes and credential swaps made while offline take
/// effect on the next connection. Returns `false` on shutdown.
async fn idle_until_reconnect(
    cmd_rx: &mut mpsc::Receiver<SocketCommand>,
    state: &mut SocketState,
    delay: Duration,
) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(SocketCommand::Subscribe(channel)) => {
                        state.subscriptions.insert(channel);
                    }
                    Some(SocketCommand::Unsubscribe(channel)) => {
                        state.subscriptions.remove(&channel);
                    }
                    Some(SocketCommand::Publish { destination, .. }) => {
                        // No transport to send on. The caller observes the
                        // Disconnected status and handles the failure.
                        warn!(destination = %destination, "Dropping publish while disconnected");
                    }
                    Some(SocketCommand::UpdateCredential(token)) => {
                        state.credential = token;
                    }
                    Some(SocketCommand::GetStatus(reply)) => {
                        let _ = reply.send(state.status);
                    }
                    Some(SocketCommand::Shutdown) | None => return false,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wardline_shared::RoomId;

    #[test]
    fn subscribe_frame_serializes_with_destination() {
        let channel = Channel::Messages(RoomId::from("7"));
        let frame = ClientFrame::Subscribe {
            destination: channel.destination(),
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("/topic/chat/7"));
        assert!(json.contains("subscribe"));
    }

    #[tokio::test]
    async fn idle_loop_tracks_subscriptions_and_shutdown() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut state = SocketState {
            credential: "t".into(),
            subscriptions: HashSet::new(),
            status: ConnectionStatus::Disconnected,
        };

        tx.send(SocketCommand::Subscribe(Channel::Read(RoomId::from("3"))))
            .await
            .unwrap();
        tx.send(SocketCommand::Shutdown).await.unwrap();

        let keep_going =
            idle_until_reconnect(&mut rx, &mut state, Duration::from_secs(30)).await;
        assert!(!keep_going);
        assert!(state.subscriptions.contains(&Channel::Read(RoomId::from("3"))));
    }

    #[tokio::test]
    async fn spawned_task_reports_status() {
        let (cmd_tx, notif_tx) = spawn_socket(SocketConfig::new("ws://127.0.0.1:1", "token"));
        let mut events = notif_tx.subscribe();

        // First transition is always Connecting, before any dial outcome.
        match events.recv().await.unwrap() {
            SocketNotification::StatusChanged(status) => {
                assert_eq!(status, ConnectionStatus::Connecting);
            }
            other => panic!("unexpected notification: {other:?}"),
        }

        cmd_tx.send(SocketCommand::Shutdown).await.unwrap();
    }
}
