//! Read-only HTTP views over the store the realtime core writes to.
//!
//! These are the collaborator interface for history retrieval and sidebar
//! listing; they hold no state of their own.
//!
//! - `GET /api/users` - all known usernames
//! - `GET /api/chat/history/{me}/{other}` - ordered message array for a pair
//! - `GET /api/chat/unread/{user}` - map of sender -> unread count

use crate::app::AppState;
use crate::messages::ChatMessage;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use std::collections::HashMap;
use tracing::error;

/// Build the read-only API router.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/api/users", get(list_users))
        .route("/api/chat/history/:me/:other", get(chat_history))
        .route("/api/chat/unread/:user", get(unread_counts))
}

async fn list_users(State(state): State<AppState>) -> Result<Json<Vec<String>>, StatusCode> {
    state.presence.known_users().await.map(Json).map_err(|e| {
        error!(target: "chat.routes", error = %e, "Failed to list users");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

/// Full transcript for a pair. Both parameter orders resolve to the same
/// canonical log.
async fn chat_history(
    State(state): State<AppState>,
    Path((me, other)): Path<(String, String)>,
) -> Result<Json<Vec<ChatMessage>>, StatusCode> {
    state
        .messages
        .history(&me, &other)
        .await
        .map(Json)
        .map_err(|e| {
            error!(target: "chat.routes", error = %e, "Failed to read chat history");
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

async fn unread_counts(
    State(state): State<AppState>,
    Path(user): Path<String>,
) -> Result<Json<HashMap<String, i64>>, StatusCode> {
    state
        .messages
        .unread_counts(&user)
        .await
        .map(Json)
        .map_err(|e| {
            error!(target: "chat.routes", error = %e, "Failed to read unread counts");
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::messages::ChatMessage;
    use crate::store::MemoryStore;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn test_app() -> (Router, AppState) {
        let state = AppState::new(Arc::new(MemoryStore::new()));
        let router = api_router().with_state(state.clone());
        (router, state)
    }

    async fn get_json(router: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn test_history_is_order_independent_in_params() {
        let (router, state) = test_app();

        state
            .messages
            .append(&ChatMessage::user("alice", "bob", Some("hi".into()), None, None))
            .await
            .unwrap();

        let (status, body) = get_json(router.clone(), "/api/chat/history/bob/alice").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().map(Vec::len), Some(1));

        let (_, reversed) = get_json(router, "/api/chat/history/alice/bob").await;
        assert_eq!(body, reversed);
    }

    #[tokio::test]
    async fn test_history_empty_pair() {
        let (router, _state) = test_app();

        let (status, body) = get_json(router, "/api/chat/history/alice/bob").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_unread_counts_view() {
        let (router, state) = test_app();

        state.messages.increment_unread("bob", "alice").await.unwrap();
        state.messages.increment_unread("bob", "alice").await.unwrap();

        let (status, body) = get_json(router, "/api/chat/unread/bob").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({"alice": 2}));
    }

    #[tokio::test]
    async fn test_users_listing() {
        let (router, state) = test_app();

        state.store.add_known_user("alice").await.unwrap();
        state.store.add_known_user("bob").await.unwrap();

        let (status, body) = get_json(router, "/api/users").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!(["alice", "bob"]));
    }

    #[tokio::test]
    async fn test_store_failure_maps_to_500() {
        let store = Arc::new(MemoryStore::new());
        let state = AppState::new(store.clone());
        let router = api_router().with_state(state);

        store.fail_next_operation();
        let (status, _) = get_json(router, "/api/users").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
