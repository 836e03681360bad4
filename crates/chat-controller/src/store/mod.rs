//! Key-value store port for presence and chat history persistence.
//!
//! The store is an external collaborator, not application state: every
//! operation is a single atomic round trip (SADD, HSET, HINCRBY, RPUSH, ...).
//! Multi-step guard-then-set sequences live behind the in-process call
//! registry instead, so no transaction support is required here.
//!
//! # Key Patterns
//!
//! - `users:all` - SET of every username ever registered (sidebar listing)
//! - `users:online` - HASH username -> connection id
//! - `chat:{a}:{b}` - LIST of JSON messages, usernames sorted (`a <= b`)
//! - `unread:{user}` - HASH sender -> unread count

mod memory;
mod redis;

pub use memory::MemoryStore;
pub use redis::RedisStore;

use crate::errors::ChatError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// SET of all usernames ever registered.
pub const KNOWN_USERS_KEY: &str = "users:all";

/// HASH of username -> connection id for currently reachable users.
pub const ONLINE_USERS_KEY: &str = "users:online";

/// Canonical key for a two-party conversation log.
///
/// Both directions of a pair share one ordered log, so the two usernames are
/// sorted before joining. `pair_key("bob", "alice") == pair_key("alice", "bob")`.
#[must_use]
pub fn pair_key(a: &str, b: &str) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("chat:{lo}:{hi}")
}

/// HASH key holding per-sender unread counters for one recipient.
#[must_use]
pub fn unread_key(user: &str) -> String {
    format!("unread:{user}")
}

/// Store port used by the presence registry and the message log service.
///
/// Implementations: [`RedisStore`] for production, [`MemoryStore`] for tests.
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Add a username to the all-time set. Idempotent.
    async fn add_known_user(&self, username: &str) -> Result<(), ChatError>;

    /// All usernames ever registered.
    async fn known_users(&self) -> Result<Vec<String>, ChatError>;

    /// Record the live connection id for a username, overwriting any prior one.
    async fn set_online(&self, username: &str, connection_id: &str) -> Result<(), ChatError>;

    /// Remove the online entry for a username.
    async fn remove_online(&self, username: &str) -> Result<(), ChatError>;

    /// Snapshot of the online map (username -> connection id).
    async fn online_map(&self) -> Result<HashMap<String, String>, ChatError>;

    /// Append a serialized message to an ordered log. Never overwrites.
    async fn log_append(&self, key: &str, entry: &str) -> Result<(), ChatError>;

    /// Full contents of an ordered log, in insertion order.
    async fn log_range(&self, key: &str) -> Result<Vec<String>, ChatError>;

    /// Atomically increment the unread counter for (recipient, sender) and
    /// return the new count.
    async fn increment_unread(&self, recipient: &str, sender: &str) -> Result<i64, ChatError>;

    /// Reset the unread counter for (recipient, sender) to zero. Idempotent.
    async fn clear_unread(&self, recipient: &str, sender: &str) -> Result<(), ChatError>;

    /// All unread counters for a recipient (sender -> count).
    async fn unread_counts(&self, recipient: &str) -> Result<HashMap<String, i64>, ChatError>;
}

/// Shared handle to the injected store implementation.
pub type SharedStore = Arc<dyn ChatStore>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_key_is_order_independent() {
        assert_eq!(pair_key("alice", "bob"), pair_key("bob", "alice"));
        assert_eq!(pair_key("alice", "bob"), "chat:alice:bob");
    }

    #[test]
    fn test_pair_key_is_case_sensitive() {
        // Usernames are case-sensitive, so "Bob" sorts before "alice"
        assert_eq!(pair_key("alice", "Bob"), "chat:Bob:alice");
    }

    #[test]
    fn test_pair_key_same_user() {
        assert_eq!(pair_key("alice", "alice"), "chat:alice:alice");
    }

    #[test]
    fn test_unread_key_format() {
        assert_eq!(unread_key("bob"), "unread:bob");
    }
}
