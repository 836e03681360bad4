//! Application state and router assembly.

use crate::calls::CallSessionManager;
use crate::dispatcher;
use crate::messages::MessageService;
use crate::observability::{health_router, HealthState};
use crate::presence::Presence;
use crate::routes;
use crate::store::SharedStore;
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Shared application state: the three core services over one injected store.
#[derive(Clone)]
pub struct AppState {
    pub store: SharedStore,
    pub presence: Arc<Presence>,
    pub messages: MessageService,
    pub calls: Arc<CallSessionManager>,
}

impl AppState {
    /// Wire the services over the given store.
    #[must_use]
    pub fn new(store: SharedStore) -> Self {
        let presence = Arc::new(Presence::new(Arc::clone(&store)));
        let messages = MessageService::new(Arc::clone(&store));
        let calls = Arc::new(CallSessionManager::new(
            Arc::clone(&presence),
            messages.clone(),
        ));
        Self {
            store,
            presence,
            messages,
            calls,
        }
    }
}

/// Build the complete HTTP router: realtime WebSocket endpoint, read-only
/// API views and health probes.
pub fn router(state: AppState, health_state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/ws", get(dispatcher::ws_handler))
        .merge(routes::api_router())
        .with_state(state)
        .merge(health_router(health_state))
        .layer(TraceLayer::new_for_http())
}
