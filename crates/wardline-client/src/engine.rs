//! Engine orchestration: session startup, the notification bridge loop,
//! room lifecycle, and the public operation surface.
//!
//! The engine owns one socket connection (shared through the process-wide
//! registry), one REST client, and the shared state. A background task
//! consumes socket notifications and folds them into state, emitting
//! [`ChatEvent`]s for the embedder.

use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use wardline_net::{
    ChatApi, ConnectionHandle, ConnectionRegistry, NetError, SocketConfig, SocketNotification,
};
use wardline_shared::protocol::{Channel, PushEvent, RawMessage};
use wardline_shared::{ConnectionStatus, RoomId, UserId};
use wardline_store::{Message, Participant, Room, RoomPatch};

use crate::config::ChatConfig;
use crate::error::{ClientError, Result};
use crate::events::ChatEvent;
use crate::fanout::Fanout;
use crate::read_tracker::ReadTracker;
use crate::state::EngineState;
use crate::{history, send};

/// The chat synchronization engine for one authenticated user.
#[derive(Debug, Clone)]
pub struct ChatEngine {
    config: ChatConfig,
    api: ChatApi,
    conn: ConnectionHandle,
    state: Arc<Mutex<EngineState>>,
    events: mpsc::UnboundedSender<ChatEvent>,
    user: UserId,
    user_name: String,
    tracker: ReadTracker,
}

impl ChatEngine {
    /// Start a session: verify the credential, acquire the socket, load the
    /// room list, subscribe every room's channels, and spawn the bridge
    /// loop. Returns the engine handle and the event stream.
    pub async fn start(
        config: ChatConfig,
        user: UserId,
        user_name: impl Into<String>,
        token: impl Into<String>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ChatEvent>)> {
        let token = token.into();
        let api = ChatApi::new(&config.api_url, token.clone());
        api.verify_token().await?;

        let mut socket_config = SocketConfig::new(&config.socket_url, token);
        socket_config.reconnect_delay = config.reconnect_delay;
        let conn = ConnectionRegistry::global().acquire(user.as_str(), socket_config);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(EngineState::new()));

        let tracker = ReadTracker::new(
            api.clone(),
            state.clone(),
            events_tx.clone(),
            user.clone(),
            config.data_dir.clone(),
            config.read_debounce,
        );

        let engine = Self {
            config,
            api,
            conn,
            state,
            events: events_tx,
            user: user.clone(),
            user_name: user_name.into(),
            tracker,
        };

        engine.refresh_rooms().await?;
        info!(user = %user, "Chat engine started");

        let bridge = engine.clone();
        let notifications = engine.conn.events();
        tokio::spawn(async move {
            bridge.notification_loop(notifications).await;
        });

        Ok((engine, events_rx))
    }

    // -- Public operations ---------------------------------------------------

    /// Bring `room` on screen: probe access, swap the per-room channels,
    /// load the initial history window, and mark the room read.
    pub async fn activate_room(&self, room: &RoomId) -> Result<()> {
        let allowed = self
            .api
            .probe_access(room, &self.user)
            .await
            .map_err(|e| self.tag(e.into()))?;
        if !allowed {
            warn!(room = %room, "Access to room denied");
            let mut guard = self.lock();
            guard.registry.mark_inaccessible(room);
            drop(guard);
            let _ = self.events.send(ChatEvent::AccessDenied { room_id: room.clone() });
            let _ = self.events.send(ChatEvent::RoomsChanged);
            return Ok(());
        }

        let (previous, needs_global) = {
            let mut guard = self.lock();
            let previous = guard.active_room.replace(room.clone());
            guard.cursor_mut(room).reset();
            let needs_global = guard.subscribed.insert(room.clone());
            (previous, needs_global)
        };

        // Read and participant channels follow the active room only; the
        // message and unread channels of every room stay up globally and
        // are never dropped by mere navigation.
        if let Some(previous) = previous.filter(|p| p != room) {
            let _ = self.conn.unsubscribe(Channel::Read(previous.clone())).await;
            let _ = self
                .conn
                .unsubscribe(Channel::Participants(previous))
                .await;
        }
        if needs_global {
            let _ = self.conn.subscribe(Channel::Messages(room.clone())).await;
            let _ = self.conn.subscribe(Channel::UnreadCount(room.clone())).await;
        }
        let _ = self.conn.subscribe(Channel::Read(room.clone())).await;
        let _ = self.conn.subscribe(Channel::Participants(room.clone())).await;

        // Fresh room snapshot on entry; the push channels keep it current
        // afterwards.
        if let Ok(record) = self.api.get_room(room).await {
            let mut guard = self.lock();
            guard.registry.set_participants(
                room,
                record.participants.into_iter().map(Participant::from).collect(),
            );
            drop(guard);
            let _ = self.events.send(ChatEvent::RoomsChanged);
        }

        history::load_initial(
            &self.api,
            &self.state,
            &self.events,
            room,
            &self.user,
            self.config.page_size,
            self.config.min_initial_messages,
        )
        .await
        .map_err(|e| self.tag(e))?;

        if let Err(e) = self.tracker.mark_now(room).await {
            warn!(room = %room, error = %e, "Read call on room entry failed");
        }
        Ok(())
    }

    /// Take the active room off screen. Its message and unread channels
    /// stay subscribed; only the read and participant channels drop.
    pub async fn deactivate_room(&self) {
        let previous = {
            let mut guard = self.lock();
            guard.active_room.take()
        };
        if let Some(room) = previous {
            let _ = self.conn.unsubscribe(Channel::Read(room.clone())).await;
            let _ = self.conn.unsubscribe(Channel::Participants(room)).await;
        }
    }

    /// Fetch the next older history page for `room`. Returns how many
    /// messages it added.
    pub async fn load_older_messages(&self, room: &RoomId) -> Result<usize> {
        history::load_older(
            &self.api,
            &self.state,
            &self.events,
            room,
            &self.user,
            self.config.page_size,
        )
        .await
        .map_err(|e| self.tag(e))
    }

    /// Send a text message to `room`.
    pub async fn send_message(&self, room: &RoomId, content: &str) -> Result<()> {
        send::send_text(
            &self.conn,
            &self.state,
            &self.events,
            room,
            &self.user,
            &self.user_name,
            content,
        )
        .await
    }

    /// Upload a file into `room`.
    pub async fn send_attachment(
        &self,
        room: &RoomId,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<()> {
        send::send_attachment(
            &self.api,
            &self.state,
            &self.events,
            room,
            &self.user,
            &self.user_name,
            file_name,
            bytes,
        )
        .await
        .map_err(|e| self.tag(e))
    }

    /// Delete a message. The timeline entry stays as a redacted tombstone.
    pub async fn delete_message(&self, room: &RoomId, message_id: &str) -> Result<()> {
        self.api
            .delete_message(room, message_id)
            .await
            .map_err(|e| self.tag(e.into()))?;
        let mut guard = self.lock();
        let changed = guard.store.mark_deleted(room, message_id);
        drop(guard);
        if changed {
            let _ = self.events.send(ChatEvent::MessagesChanged { room_id: room.clone() });
        }
        Ok(())
    }

    /// Open (or create) the one-to-one room with `other`.
    pub async fn create_direct_room(&self, other: &UserId) -> Result<RoomId> {
        let record = self
            .api
            .create_direct_room(&self.user, other)
            .await
            .map_err(|e| self.tag(e.into()))?;
        let room = RoomId::new(record.id);
        self.refresh_rooms().await?;
        Ok(room)
    }

    /// Create a named group room. The current user is always a member.
    pub async fn create_group_room(&self, name: &str, others: &[UserId]) -> Result<RoomId> {
        let mut members = vec![self.user.clone()];
        for other in others {
            if !members.contains(other) {
                members.push(other.clone());
            }
        }
        let record = self
            .api
            .create_group_room(name, &members)
            .await
            .map_err(|e| self.tag(e.into()))?;
        let room = RoomId::new(record.id);
        self.refresh_rooms().await?;
        Ok(room)
    }

    /// Invite `others` into an existing group room, one call per employee.
    pub async fn invite(&self, room: &RoomId, others: &[UserId]) -> Result<()> {
        for other in others {
            self.api
                .invite(room, other)
                .await
                .map_err(|e| self.tag(e.into()))?;
        }
        if let Ok(participants) = self.api.get_participants(room).await {
            let mut guard = self.lock();
            guard
                .registry
                .set_participants(room, participants.into_iter().map(Participant::from).collect());
            drop(guard);
            let _ = self.events.send(ChatEvent::RoomsChanged);
        }
        Ok(())
    }

    /// Leave `room`: backend call, channel teardown, local cleanup.
    pub async fn exit_room(&self, room: &RoomId) -> Result<()> {
        self.api.exit_room(room).await.map_err(|e| self.tag(e.into()))?;

        for channel in [
            Channel::Messages(room.clone()),
            Channel::Read(room.clone()),
            Channel::Participants(room.clone()),
            Channel::UnreadCount(room.clone()),
        ] {
            let _ = self.conn.unsubscribe(channel).await;
        }

        {
            let mut guard = self.lock();
            guard.store.clear(room);
            guard.cursors.remove(room);
            guard.subscribed.remove(room);
            if guard.is_active(room) {
                guard.active_room = None;
            }
        }
        self.refresh_rooms().await?;
        Ok(())
    }

    /// Swap the bearer credential on both transports after a token refresh.
    pub async fn update_credential(&self, token: impl Into<String>) -> Result<()> {
        let token = token.into();
        self.api.update_credential(token.clone());
        self.conn.update_credential(token).await?;
        Ok(())
    }

    /// End the session: stop pending read timers and tear down the socket.
    pub async fn logout(&self) {
        self.tracker.abort_all();
        ConnectionRegistry::global().release(self.user.as_str()).await;
        info!(user = %self.user, "Chat engine stopped");
    }

    // -- Read accessors ------------------------------------------------------

    pub fn rooms(&self) -> Vec<Room> {
        self.lock().registry.rooms().to_vec()
    }

    pub fn messages(&self, room: &RoomId) -> Vec<Message> {
        self.lock().store.get(room).to_vec()
    }

    pub fn total_unread(&self) -> u32 {
        self.lock().registry.total_unread()
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.lock().status
    }

    pub fn active_room(&self) -> Option<RoomId> {
        self.lock().active_room.clone()
    }

    // -- Internals -----------------------------------------------------------

    /// Reload the room list, reconcile per-room badges, and line the
    /// subscription set up with the new membership.
    pub async fn refresh_rooms(&self) -> Result<()> {
        let mut records = self
            .api
            .list_rooms(&self.user)
            .await
            .map_err(|e| self.tag(e.into()))?;

        // The list endpoint's badge can lag; the per-room endpoint is
        // authoritative. Individual failures keep the list value.
        for record in &mut records {
            let room = RoomId::new(record.id.clone());
            if let Ok(count) = self.api.unread_count(&room).await {
                record.unread_count = Some(count);
            }
        }

        let (to_subscribe, to_unsubscribe, total) = {
            let mut guard = self.lock();
            guard.registry.replace_all(records);

            let current: Vec<RoomId> =
                guard.registry.rooms().iter().map(|r| r.id.clone()).collect();
            let to_subscribe: Vec<RoomId> = current
                .iter()
                .filter(|id| !guard.subscribed.contains(id))
                .cloned()
                .collect();
            let to_unsubscribe: Vec<RoomId> = guard
                .subscribed
                .iter()
                .filter(|id| !current.contains(id))
                .cloned()
                .collect();
            for id in &to_subscribe {
                guard.subscribed.insert(id.clone());
            }
            for id in &to_unsubscribe {
                guard.subscribed.remove(id);
            }
            (to_subscribe, to_unsubscribe, guard.registry.total_unread())
        };

        for id in to_subscribe {
            let _ = self.conn.subscribe(Channel::Messages(id.clone())).await;
            let _ = self.conn.subscribe(Channel::UnreadCount(id)).await;
        }
        for id in to_unsubscribe {
            let _ = self.conn.unsubscribe(Channel::Messages(id.clone())).await;
            let _ = self.conn.unsubscribe(Channel::UnreadCount(id)).await;
        }

        let _ = self.events.send(ChatEvent::RoomsChanged);
        let _ = self.events.send(ChatEvent::TotalUnreadChanged(total));
        Ok(())
    }

    /// Consume socket notifications until the connection is torn down.
    async fn notification_loop(self, mut notifications: broadcast::Receiver<SocketNotification>) {
        let mut fanout = Fanout::new();
        info!("Notification bridge started");

        loop {
            match notifications.recv().await {
                Ok(SocketNotification::StatusChanged(status)) => {
                    {
                        let mut guard = self.lock();
                        guard.status = status;
                    }
                    let _ = self.events.send(ChatEvent::ConnectionChanged(status));
                    if status == ConnectionStatus::Connected {
                        // Broadcasts may have been missed while offline.
                        self.tracker.reconcile_with_server().await;
                    }
                }
                Ok(SocketNotification::Event(event)) => {
                    self.handle_push(&mut fanout, event).await;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Notification bridge lagged, resynchronizing badges");
                    self.tracker.reconcile_with_server().await;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }

        info!("Notification bridge terminated");
    }

    async fn handle_push(&self, fanout: &mut Fanout, event: PushEvent) {
        match event {
            PushEvent::Message { room_id, message } => {
                self.handle_pushed_message(fanout, room_id, message).await;
            }
            PushEvent::Receipt { room_id, receipt } => {
                // Our own receipts already took effect locally when the
                // read call was issued.
                if receipt.user_id == self.user.as_str() {
                    return;
                }
                let changed = {
                    let mut guard = self.lock();
                    guard
                        .store
                        .apply_receipt(&room_id, &receipt.message_id, &UserId::new(receipt.user_id))
                };
                if changed {
                    let _ = self.events.send(ChatEvent::MessagesChanged { room_id });
                }
            }
            PushEvent::Participants { room_id, participants } => {
                let mut guard = self.lock();
                guard.registry.set_participants(
                    &room_id,
                    participants.into_iter().map(Participant::from).collect(),
                );
                drop(guard);
                let _ = self.events.send(ChatEvent::RoomsChanged);
            }
            PushEvent::UnreadCount { room_id, broadcast } => {
                let mut guard = self.lock();
                fanout.apply_unread_broadcast(
                    &mut guard,
                    &self.events,
                    &room_id,
                    &broadcast,
                    &self.user,
                );
            }
        }
    }

    async fn handle_pushed_message(&self, fanout: &mut Fanout, room_id: RoomId, raw: RawMessage) {
        // A message for a room the registry does not know means we were
        // just added to a new room; resync the list first.
        let known = self.lock().registry.contains(&room_id);
        if !known {
            debug!(room = %room_id, "Message for unknown room, refreshing room list");
            if let Err(e) = self.refresh_rooms().await {
                warn!(room = %room_id, error = %e, "Room list refresh failed");
            }
        }

        let message = Message::from_raw(raw, &room_id, &self.user);

        // Image pushes can arrive before the blob store has a URL.
        let needs_backfill = !message.id.is_provisional()
            && message
                .attachment
                .as_ref()
                .is_some_and(|a| a.is_image() && a.url.is_none());
        if needs_backfill {
            self.spawn_attachment_backfill(room_id.clone(), message.id.as_str().to_owned());
        }

        let is_active = self.lock().is_active(&room_id);
        if is_active {
            let from_other = message.sender_id != self.user;
            let readable = message.classification.is_readable();
            let preview = wardline_shared::preview::preview_text(
                message.attachment.as_ref().map(|a| a.kind.as_str()),
                &message.content,
            );
            let timestamp = message.timestamp;
            let outcome = {
                let mut guard = self.lock();
                let outcome = guard.store.reconcile_echo(&room_id, message);
                guard.registry.merge(
                    &room_id,
                    RoomPatch {
                        last_message: Some(preview),
                        unread_count: Some(0),
                        last_message_timestamp: Some(timestamp),
                    },
                );
                outcome
            };
            if outcome != wardline_store::EchoOutcome::Duplicate {
                let _ = self
                    .events
                    .send(ChatEvent::MessagesChanged { room_id: room_id.clone() });
                let _ = self.events.send(ChatEvent::RoomsChanged);
            }
            // The user is looking at the room, so reading it is implied,
            // debounced against bursts.
            if from_other && readable {
                self.tracker.schedule(room_id);
            }
        } else {
            let confirmed = self
                .tracker
                .is_confirmed_read(&room_id, message.id.as_str());
            let mut guard = self.lock();
            fanout.handle_background_message(
                &mut guard,
                &self.events,
                &message,
                &self.user,
                confirmed,
            );
        }
    }

    fn spawn_attachment_backfill(&self, room: RoomId, message_id: String) {
        let engine = self.clone();
        tokio::spawn(async move {
            match engine.api.get_message(&room, &message_id).await {
                Ok(raw) => {
                    if let Some(url) = raw.attachment_url {
                        let changed = {
                            let mut guard = engine.lock();
                            guard.store.backfill_attachment_url(&room, &message_id, url)
                        };
                        if changed {
                            debug!(room = %room, id = %message_id, "Attachment URL backfilled");
                            let _ = engine
                                .events
                                .send(ChatEvent::MessagesChanged { room_id: room });
                        }
                    }
                }
                Err(e) => {
                    debug!(room = %room, id = %message_id, error = %e, "Attachment backfill failed");
                }
            }
        });
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, EngineState> {
        self.state.lock().expect("state lock poisoned")
    }

    /// Surface credential failures as an event in addition to the error.
    fn tag(&self, err: ClientError) -> ClientError {
        if matches!(err, ClientError::Net(NetError::CredentialExpired)) {
            let _ = self.events.send(ChatEvent::CredentialsInvalid);
        }
        err
    }
}
