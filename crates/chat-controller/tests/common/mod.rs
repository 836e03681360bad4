//! Shared test harness: drives dispatcher connections over channels,
//! no live socket required.

#![allow(dead_code)]

use chat_controller::app::AppState;
use chat_controller::dispatcher::Connection;
use chat_controller::events::{ClientEvent, ServerEvent};
use chat_controller::store::MemoryStore;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// One simulated client: a dispatcher connection plus its outbound channel.
pub struct TestClient {
    pub conn: Connection,
    pub rx: mpsc::UnboundedReceiver<ServerEvent>,
}

impl TestClient {
    /// Collect every event queued so far.
    pub fn drain(&mut self) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Fresh application state over an in-memory store.
pub fn test_state() -> (AppState, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    (AppState::new(store.clone()), store)
}

/// Open a connection without registering a username.
pub fn connect(state: &AppState) -> TestClient {
    let (tx, rx) = mpsc::unbounded_channel();
    TestClient {
        conn: Connection::new(state.clone(), Uuid::new_v4().to_string(), tx),
        rx,
    }
}

/// Open a connection and register a username, discarding the roster
/// broadcasts it triggers.
pub async fn register(state: &AppState, username: &str) -> TestClient {
    let mut client = connect(state);
    client
        .conn
        .handle_event(ClientEvent::RegisterUser(username.to_string()))
        .await;
    client.drain();
    client
}
