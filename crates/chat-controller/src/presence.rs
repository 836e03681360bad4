//! Presence registry - maps usernames to live connections.
//!
//! The live connection handles are process-local (an event channel per
//! WebSocket); the store keeps the durable side (`users:all`, `users:online`)
//! that the read-only HTTP views serve.
//!
//! No presence operation "fails" toward the realtime channel: an unresolvable
//! or stale recipient is a normal offline condition, reported as a typed
//! [`Delivery`] so callers cannot forget to branch on it.

use crate::errors::ChatError;
use crate::events::ServerEvent;
use crate::store::SharedStore;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Outcome of a relay attempt. Offline recipients are a normal condition,
/// never an error; the event is dropped for that recipient only, not retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    RecipientOffline,
}

impl Delivery {
    #[must_use]
    pub fn is_delivered(self) -> bool {
        matches!(self, Delivery::Delivered)
    }
}

/// Handle to one live client connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    connection_id: String,
    sender: mpsc::UnboundedSender<ServerEvent>,
}

impl ConnectionHandle {
    #[must_use]
    pub fn new(connection_id: String, sender: mpsc::UnboundedSender<ServerEvent>) -> Self {
        Self {
            connection_id,
            sender,
        }
    }

    #[must_use]
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Queue an event for this connection. A closed channel means the client
    /// quietly disappeared; that counts as offline for this event only.
    pub fn send(&self, event: ServerEvent) -> Delivery {
        if self.sender.send(event).is_ok() {
            Delivery::Delivered
        } else {
            Delivery::RecipientOffline
        }
    }
}

/// Presence registry over the injected store plus the in-process connection map.
pub struct Presence {
    store: SharedStore,
    connections: Mutex<HashMap<String, ConnectionHandle>>,
}

impl Presence {
    #[must_use]
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            connections: Mutex::new(HashMap::new()),
        }
    }

    fn locked(&self) -> MutexGuard<'_, HashMap<String, ConnectionHandle>> {
        match self.connections.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Record/overwrite the live connection for a username and add it to the
    /// all-time set. Idempotent; a later registration wins.
    pub async fn register(
        &self,
        username: &str,
        handle: ConnectionHandle,
    ) -> Result<(), ChatError> {
        self.store.add_known_user(username).await?;
        self.store
            .set_online(username, handle.connection_id())
            .await?;

        let connection_id = handle.connection_id().to_string();
        self.locked().insert(username.to_string(), handle);

        info!(
            target: "chat.presence",
            username = %username,
            connection_id = %connection_id,
            "User registered"
        );
        Ok(())
    }

    /// Resolve the live connection for a username. Absence means the
    /// recipient is not currently reachable.
    #[must_use]
    pub fn lookup(&self, username: &str) -> Option<ConnectionHandle> {
        self.locked().get(username).cloned()
    }

    /// Remove the presence entry on disconnect. The all-time set is untouched.
    ///
    /// Removal is guarded by the connection id: a stale disconnect from an
    /// overwritten connection must not knock a re-registered user offline.
    /// Returns whether the disconnecting connection owned the entry, so the
    /// caller can skip the rest of its cleanup on the stale path.
    pub async fn remove(&self, username: &str, connection_id: &str) -> Result<bool, ChatError> {
        let owned = {
            let mut connections = self.locked();
            match connections.get(username) {
                Some(handle) if handle.connection_id() == connection_id => {
                    connections.remove(username);
                    true
                }
                _ => false,
            }
        };

        if owned {
            self.store.remove_online(username).await?;
            info!(
                target: "chat.presence",
                username = %username,
                connection_id = %connection_id,
                "User disconnected"
            );
        } else {
            debug!(
                target: "chat.presence",
                username = %username,
                connection_id = %connection_id,
                "Ignoring stale disconnect for overwritten connection"
            );
        }
        Ok(owned)
    }

    /// Relay an event to one recipient, if reachable.
    pub fn relay(&self, to: &str, event: ServerEvent) -> Delivery {
        match self.lookup(to) {
            Some(handle) => handle.send(event),
            None => {
                debug!(
                    target: "chat.presence",
                    to = %to,
                    "Recipient not reachable, dropping event"
                );
                Delivery::RecipientOffline
            }
        }
    }

    /// Fan an event out to every live connection.
    pub fn broadcast(&self, event: &ServerEvent) {
        let connections = self.locked();
        for handle in connections.values() {
            let _ = handle.send(event.clone());
        }
    }

    /// All usernames ever registered (sidebar listing).
    pub async fn known_users(&self) -> Result<Vec<String>, ChatError> {
        self.store.known_users().await
    }

    /// Durable online map (username -> connection id).
    pub async fn online_map(&self) -> Result<HashMap<String, String>, ChatError> {
        self.store.online_map().await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::Arc;

    fn presence() -> Presence {
        Presence::new(Arc::new(MemoryStore::new()))
    }

    fn handle(id: &str) -> (ConnectionHandle, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ConnectionHandle::new(id.to_string(), tx), rx)
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let presence = presence();
        let (alice, _rx) = handle("conn-1");

        presence.register("alice", alice).await.unwrap();

        assert!(presence.lookup("alice").is_some());
        assert!(presence.lookup("bob").is_none());
        assert_eq!(presence.known_users().await.unwrap(), vec!["alice"]);
        assert_eq!(
            presence
                .online_map()
                .await
                .unwrap()
                .get("alice")
                .map(String::as_str),
            Some("conn-1")
        );
    }

    #[tokio::test]
    async fn test_later_registration_overwrites() {
        let presence = presence();
        let (first, _rx1) = handle("conn-1");
        let (second, _rx2) = handle("conn-2");

        presence.register("alice", first).await.unwrap();
        presence.register("alice", second).await.unwrap();

        let current = presence.lookup("alice").unwrap();
        assert_eq!(current.connection_id(), "conn-2");
        // Registered twice, listed once
        assert_eq!(presence.known_users().await.unwrap(), vec!["alice"]);
    }

    #[tokio::test]
    async fn test_remove_keeps_known_users() {
        let presence = presence();
        let (alice, _rx) = handle("conn-1");

        presence.register("alice", alice).await.unwrap();
        assert!(presence.remove("alice", "conn-1").await.unwrap());

        assert!(presence.lookup("alice").is_none());
        assert!(presence.online_map().await.unwrap().is_empty());
        assert_eq!(presence.known_users().await.unwrap(), vec!["alice"]);
    }

    #[tokio::test]
    async fn test_stale_disconnect_does_not_remove_new_connection() {
        let presence = presence();
        let (first, _rx1) = handle("conn-1");
        let (second, _rx2) = handle("conn-2");

        presence.register("alice", first).await.unwrap();
        presence.register("alice", second).await.unwrap();

        // The old connection's disconnect arrives after the re-registration
        assert!(!presence.remove("alice", "conn-1").await.unwrap());

        assert!(presence.lookup("alice").is_some());
        assert!(presence.online_map().await.unwrap().contains_key("alice"));
    }

    #[tokio::test]
    async fn test_relay_to_online_recipient() {
        let presence = presence();
        let (alice, mut rx) = handle("conn-1");
        presence.register("alice", alice).await.unwrap();

        let delivery = presence.relay("alice", ServerEvent::CallEnded);

        assert!(delivery.is_delivered());
        assert_eq!(rx.recv().await, Some(ServerEvent::CallEnded));
    }

    #[tokio::test]
    async fn test_relay_to_offline_recipient() {
        let presence = presence();
        assert_eq!(
            presence.relay("ghost", ServerEvent::CallEnded),
            Delivery::RecipientOffline
        );
    }

    #[tokio::test]
    async fn test_relay_to_stale_handle_counts_as_offline() {
        let presence = presence();
        let (alice, rx) = handle("conn-1");
        presence.register("alice", alice).await.unwrap();

        // Client went away without a disconnect
        drop(rx);

        assert_eq!(
            presence.relay("alice", ServerEvent::CallEnded),
            Delivery::RecipientOffline
        );
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all_connections() {
        let presence = presence();
        let (alice, mut alice_rx) = handle("conn-1");
        let (bob, mut bob_rx) = handle("conn-2");
        presence.register("alice", alice).await.unwrap();
        presence.register("bob", bob).await.unwrap();

        presence.broadcast(&ServerEvent::UsersList(vec!["alice".into(), "bob".into()]));

        assert!(alice_rx.recv().await.is_some());
        assert!(bob_rx.recv().await.is_some());
    }
}
