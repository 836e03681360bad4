//! Event dispatcher - connection-scoped routing of realtime events.
//!
//! One [`Connection`] per WebSocket. Inbound frames are deserialized into
//! [`ClientEvent`]s and routed to the presence registry, the message service
//! or the call session manager; outbound [`ServerEvent`]s flow through an
//! unbounded channel drained by a writer task.
//!
//! Call-related and typing events from a connection that has not registered
//! a username yet are dropped and logged, never processed - an undefined
//! origin must not reach the call-session map.

use crate::app::AppState;
use crate::calls::CallEvent;
use crate::errors::ChatError;
use crate::events::{
    CallMessageOut, CallMessagePayload, ClientEvent, PrivateMessagePayload, ServerEvent,
};
use crate::messages::{now_millis, ChatMessage};
use crate::presence::ConnectionHandle;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// WebSocket upgrade handler for `GET /ws`.
pub async fn ws_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

/// Run one client connection to completion.
async fn handle_socket(state: AppState, socket: WebSocket) {
    let connection_id = Uuid::new_v4().to_string();
    info!(
        target: "chat.dispatcher",
        connection_id = %connection_id,
        "Connection opened"
    );

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<ServerEvent>();

    // Writer task: serialize outbound events onto the socket
    let writer_connection_id = connection_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(frame) => {
                    if ws_tx.send(Message::Text(frame)).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(
                        target: "chat.dispatcher",
                        connection_id = %writer_connection_id,
                        error = %e,
                        "Failed to serialize outbound event"
                    );
                }
            }
        }
    });

    let mut connection = Connection::new(state, connection_id, event_tx);

    while let Some(frame) = ws_rx.next().await {
        let Ok(message) = frame else {
            break;
        };
        match message {
            Message::Text(text) => connection.handle_frame(&text).await,
            Message::Close(_) => break,
            // Ping/pong are handled by axum; binary frames are not part of
            // the protocol
            _ => {}
        }
    }

    connection.disconnected().await;
    drop(connection);
    let _ = writer.await;
}

/// Dispatcher state for one client connection.
pub struct Connection {
    state: AppState,
    connection_id: String,
    sender: mpsc::UnboundedSender<ServerEvent>,
    /// Username bound at registration time; `None` until `register_user`.
    username: Option<String>,
}

impl Connection {
    #[must_use]
    pub fn new(
        state: AppState,
        connection_id: String,
        sender: mpsc::UnboundedSender<ServerEvent>,
    ) -> Self {
        Self {
            state,
            connection_id,
            sender,
            username: None,
        }
    }

    /// The username bound to this connection, if registered.
    #[must_use]
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Parse and route one inbound frame. Malformed frames are skipped.
    pub async fn handle_frame(&mut self, frame: &str) {
        match serde_json::from_str::<ClientEvent>(frame) {
            Ok(event) => self.handle_event(event).await,
            Err(e) => {
                debug!(
                    target: "chat.dispatcher",
                    connection_id = %self.connection_id,
                    error = %e,
                    "Skipping malformed frame"
                );
            }
        }
    }

    /// Route one inbound event. A failing handler fails this event only.
    pub async fn handle_event(&mut self, event: ClientEvent) {
        if let Err(e) = self.route(event).await {
            warn!(
                target: "chat.dispatcher",
                connection_id = %self.connection_id,
                username = self.username.as_deref().unwrap_or("<unregistered>"),
                error = %e,
                "Event handler failed, dropping event"
            );
        }
    }

    async fn route(&mut self, event: ClientEvent) -> Result<(), ChatError> {
        match event {
            ClientEvent::RegisterUser(username) => self.register(username).await,
            ClientEvent::PrivateMessage(payload) => self.private_message(payload).await,
            ClientEvent::Typing { to } => {
                let Some(from) = self.require_username("typing") else {
                    return Ok(());
                };
                // Ephemeral: offline recipient means silent drop
                let _ = self.state.presence.relay(&to, ServerEvent::Typing { from });
                Ok(())
            }
            ClientEvent::ClearUnread { me, other } => {
                self.state.messages.clear_unread(&me, &other).await
            }
            ClientEvent::CallUser { to, offer } => {
                self.call_event("call-user", CallEvent::Offer { to, offer }).await
            }
            ClientEvent::AnswerCall { to, answer } => {
                self.call_event("answer-call", CallEvent::Answer { to, answer })
                    .await
            }
            ClientEvent::IceCandidate { to, candidate } => {
                self.call_event("ice-candidate", CallEvent::IceCandidate { to, candidate })
                    .await
            }
            ClientEvent::RejectCall { to } => {
                self.call_event("reject-call", CallEvent::Reject { to }).await
            }
            ClientEvent::EndCall { to } => {
                self.call_event("end-call", CallEvent::End { to }).await
            }
            ClientEvent::MissedCall { to } => {
                self.call_event("missed-call", CallEvent::Missed { to }).await
            }
            ClientEvent::CallMessage(payload) => {
                self.call_message(payload);
                Ok(())
            }
        }
    }

    /// Bind a username to this connection and broadcast the updated roster.
    async fn register(&mut self, username: String) -> Result<(), ChatError> {
        if username.is_empty() {
            warn!(
                target: "chat.dispatcher",
                connection_id = %self.connection_id,
                "Ignoring registration with empty username"
            );
            return Ok(());
        }

        let handle = ConnectionHandle::new(self.connection_id.clone(), self.sender.clone());
        self.state.presence.register(&username, handle).await?;
        self.username = Some(username);

        self.broadcast_roster().await
    }

    /// Persist a chat message, bump the unread counter and fan out.
    ///
    /// Persistence happens whether or not the recipient is online; an offline
    /// recipient simply gets no live relay.
    async fn private_message(&self, payload: PrivateMessagePayload) -> Result<(), ChatError> {
        if payload.from.is_empty() || payload.to.is_empty() {
            warn!(
                target: "chat.dispatcher",
                connection_id = %self.connection_id,
                "Ignoring private_message with empty from/to"
            );
            return Ok(());
        }

        let message = ChatMessage::user(
            &payload.from,
            &payload.to,
            payload.message,
            payload.file,
            payload.file_name,
        );

        self.state.messages.append(&message).await?;
        let count = self
            .state
            .messages
            .increment_unread(&message.to, &message.from)
            .await?;

        if self
            .state
            .presence
            .relay(&message.to, ServerEvent::ReceiveMessage(message.clone()))
            .is_delivered()
        {
            let _ = self.state.presence.relay(
                &message.to,
                ServerEvent::UnreadUpdate {
                    from: message.from.clone(),
                    count,
                },
            );
        }

        // Echo back for the sender's local UI update
        self.send_self(ServerEvent::ReceiveMessage(message));
        Ok(())
    }

    /// Route a call event through the session manager, guarding the origin.
    async fn call_event(&self, name: &str, event: CallEvent) -> Result<(), ChatError> {
        let Some(origin) = self.require_username(name) else {
            return Ok(());
        };
        self.state.calls.apply(&origin, event).await
    }

    /// Relay an in-call chat overlay message. Never persisted.
    fn call_message(&self, payload: CallMessagePayload) {
        let Some(from) = self.require_username("call_message") else {
            return;
        };

        let out = CallMessageOut {
            from,
            message: payload.message,
            file: payload.file,
            file_name: payload.file_name,
            time: now_millis(),
        };

        let _ = self
            .state
            .presence
            .relay(&payload.to, ServerEvent::CallMessage(out.clone()));
        self.send_self(ServerEvent::CallMessage(out));
    }

    /// Cleanup on connection loss: drop the presence entry, tear down any
    /// active call through the regular transition path, re-broadcast status.
    ///
    /// Call teardown runs only when this connection still owned the presence
    /// entry. A stale disconnect from an overwritten connection must not end
    /// a call the user started on the newer one.
    pub async fn disconnected(&mut self) {
        if let Some(username) = self.username.take() {
            let owned = match self
                .state
                .presence
                .remove(&username, &self.connection_id)
                .await
            {
                Ok(owned) => owned,
                Err(e) => {
                    warn!(
                        target: "chat.dispatcher",
                        connection_id = %self.connection_id,
                        username = %username,
                        error = %e,
                        "Presence removal on disconnect failed"
                    );
                    // The store write only runs on the owned path, so a
                    // failure still means this connection held the entry
                    true
                }
            };

            if owned {
                if let Err(e) = self
                    .state
                    .calls
                    .apply(&username, CallEvent::Disconnect)
                    .await
                {
                    warn!(
                        target: "chat.dispatcher",
                        connection_id = %self.connection_id,
                        username = %username,
                        error = %e,
                        "Call teardown on disconnect failed"
                    );
                }
            }
        }

        match self.state.presence.online_map().await {
            Ok(status) => self
                .state
                .presence
                .broadcast(&ServerEvent::UsersStatus(status)),
            Err(e) => {
                warn!(
                    target: "chat.dispatcher",
                    connection_id = %self.connection_id,
                    error = %e,
                    "Failed to broadcast online status after disconnect"
                );
            }
        }

        info!(
            target: "chat.dispatcher",
            connection_id = %self.connection_id,
            "Connection closed"
        );
    }

    async fn broadcast_roster(&self) -> Result<(), ChatError> {
        let users = self.state.presence.known_users().await?;
        let status = self.state.presence.online_map().await?;
        self.state.presence.broadcast(&ServerEvent::UsersList(users));
        self.state
            .presence
            .broadcast(&ServerEvent::UsersStatus(status));
        Ok(())
    }

    /// Origin guard shared by call-related handlers.
    fn require_username(&self, event_name: &str) -> Option<String> {
        match &self.username {
            Some(username) => Some(username.clone()),
            None => {
                warn!(
                    target: "chat.dispatcher",
                    connection_id = %self.connection_id,
                    event = event_name,
                    "Ignoring event from unregistered connection"
                );
                None
            }
        }
    }

    fn send_self(&self, event: ServerEvent) {
        let _ = self.sender.send(event);
    }
}
