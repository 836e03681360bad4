//! In-memory [`ChatStore`] implementation for tests.
//!
//! Mirrors the Redis key semantics (append-only lists, hash counters,
//! overwrite-on-register) without a running server. Supports one-shot failure
//! injection so handlers can be tested against store outages.

use super::ChatStore;
use crate::errors::ChatError;
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

/// In-memory store double.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Debug, Default)]
struct Inner {
    known_users: BTreeSet<String>,
    online: HashMap<String, String>,
    logs: HashMap<String, Vec<String>>,
    unread: HashMap<String, HashMap<String, i64>>,
    fail_next: bool,
}

impl MemoryStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next store operation fail with `ChatError::Store`.
    pub fn fail_next_operation(&self) {
        self.locked().fail_next = true;
    }

    fn locked(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn check_failure(inner: &mut Inner) -> Result<(), ChatError> {
        if inner.fail_next {
            inner.fail_next = false;
            return Err(ChatError::Store("injected store failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ChatStore for MemoryStore {
    async fn add_known_user(&self, username: &str) -> Result<(), ChatError> {
        let mut inner = self.locked();
        Self::check_failure(&mut inner)?;
        inner.known_users.insert(username.to_string());
        Ok(())
    }

    async fn known_users(&self) -> Result<Vec<String>, ChatError> {
        let mut inner = self.locked();
        Self::check_failure(&mut inner)?;
        Ok(inner.known_users.iter().cloned().collect())
    }

    async fn set_online(&self, username: &str, connection_id: &str) -> Result<(), ChatError> {
        let mut inner = self.locked();
        Self::check_failure(&mut inner)?;
        inner
            .online
            .insert(username.to_string(), connection_id.to_string());
        Ok(())
    }

    async fn remove_online(&self, username: &str) -> Result<(), ChatError> {
        let mut inner = self.locked();
        Self::check_failure(&mut inner)?;
        inner.online.remove(username);
        Ok(())
    }

    async fn online_map(&self) -> Result<HashMap<String, String>, ChatError> {
        let mut inner = self.locked();
        Self::check_failure(&mut inner)?;
        Ok(inner.online.clone())
    }

    async fn log_append(&self, key: &str, entry: &str) -> Result<(), ChatError> {
        let mut inner = self.locked();
        Self::check_failure(&mut inner)?;
        inner
            .logs
            .entry(key.to_string())
            .or_default()
            .push(entry.to_string());
        Ok(())
    }

    async fn log_range(&self, key: &str) -> Result<Vec<String>, ChatError> {
        let mut inner = self.locked();
        Self::check_failure(&mut inner)?;
        Ok(inner.logs.get(key).cloned().unwrap_or_default())
    }

    async fn increment_unread(&self, recipient: &str, sender: &str) -> Result<i64, ChatError> {
        let mut inner = self.locked();
        Self::check_failure(&mut inner)?;
        let count = inner
            .unread
            .entry(recipient.to_string())
            .or_default()
            .entry(sender.to_string())
            .or_insert(0);
        *count += 1;
        Ok(*count)
    }

    async fn clear_unread(&self, recipient: &str, sender: &str) -> Result<(), ChatError> {
        let mut inner = self.locked();
        Self::check_failure(&mut inner)?;
        inner
            .unread
            .entry(recipient.to_string())
            .or_default()
            .insert(sender.to_string(), 0);
        Ok(())
    }

    async fn unread_counts(&self, recipient: &str) -> Result<HashMap<String, i64>, ChatError> {
        let mut inner = self.locked();
        Self::check_failure(&mut inner)?;
        Ok(inner.unread.get(recipient).cloned().unwrap_or_default())
    }
}
