//! Message log and unread-counter service.
//!
//! Chat messages and call-lifecycle system messages share one ordered log per
//! user pair, keyed by the canonical sorted pair key. The log is append-only
//! and never reordered, so both parties observe an identical transcript with
//! call events interleaved in-line with chat messages.

use crate::errors::ChatError;
use crate::store::{pair_key, SharedStore};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

/// System message text appended when a call starts.
pub const CALL_STARTED_TEXT: &str = "📞 Call started";

/// System message text appended when a call is rejected.
pub const CALL_REJECTED_TEXT: &str = "❌ Call rejected";

/// System message text appended when a call ends.
pub const CALL_ENDED_TEXT: &str = "❌ Call ended";

/// System message text appended for a missed call.
pub const MISSED_CALL_TEXT: &str = "📵 Missed call";

/// Message kind tag for missed-call system messages.
pub const MISSED_CALL_KIND: &str = "missed-call";

/// A single entry in a pair's conversation log. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub from: String,
    pub to: String,
    /// User-authored text, or the system text for call-lifecycle entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Opaque file URL produced by the media-upload collaborator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, rename = "fileName", skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    /// Wall clock in milliseconds.
    pub time: i64,
    /// True for call-lifecycle entries rather than user-authored content.
    #[serde(default, skip_serializing_if = "is_false")]
    pub system: bool,
    /// Typed system messages, e.g. `"missed-call"`.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

#[allow(clippy::trivially_copy_pass_by_ref)] // serde skip_serializing_if signature
fn is_false(value: &bool) -> bool {
    !*value
}

/// Current wall clock in milliseconds.
#[must_use]
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl ChatMessage {
    /// A user-authored message.
    #[must_use]
    pub fn user(
        from: &str,
        to: &str,
        message: Option<String>,
        file: Option<String>,
        file_name: Option<String>,
    ) -> Self {
        Self {
            from: from.to_string(),
            to: to.to_string(),
            message,
            file,
            file_name,
            time: now_millis(),
            system: false,
            kind: None,
        }
    }

    /// An untyped call-lifecycle system message.
    #[must_use]
    pub fn system(from: &str, to: &str, text: &str) -> Self {
        Self {
            from: from.to_string(),
            to: to.to_string(),
            message: Some(text.to_string()),
            file: None,
            file_name: None,
            time: now_millis(),
            system: true,
            kind: None,
        }
    }

    /// The typed missed-call system message.
    #[must_use]
    pub fn missed_call(from: &str, to: &str) -> Self {
        Self {
            kind: Some(MISSED_CALL_KIND.to_string()),
            ..Self::system(from, to, MISSED_CALL_TEXT)
        }
    }
}

/// Message log and unread-counter service over the injected store.
#[derive(Clone)]
pub struct MessageService {
    store: SharedStore,
}

impl MessageService {
    #[must_use]
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Append a message to the canonical pair log. Order = call order.
    pub async fn append(&self, message: &ChatMessage) -> Result<(), ChatError> {
        let entry = serde_json::to_string(message)
            .map_err(|e| ChatError::Serialization(e.to_string()))?;
        self.store
            .log_append(&pair_key(&message.from, &message.to), &entry)
            .await
    }

    /// Atomically increment the unread counter for (recipient, sender) and
    /// return the new count.
    pub async fn increment_unread(&self, recipient: &str, sender: &str) -> Result<i64, ChatError> {
        self.store.increment_unread(recipient, sender).await
    }

    /// Reset the unread counter for (recipient, sender). Invoked when the
    /// recipient opens that conversation. Idempotent.
    pub async fn clear_unread(&self, recipient: &str, sender: &str) -> Result<(), ChatError> {
        self.store.clear_unread(recipient, sender).await
    }

    /// Full transcript for a pair, in strict append order.
    ///
    /// Entries that fail to deserialize are skipped with a warning rather
    /// than failing the whole read.
    pub async fn history(&self, a: &str, b: &str) -> Result<Vec<ChatMessage>, ChatError> {
        let key = pair_key(a, b);
        let raw = self.store.log_range(&key).await?;

        let mut messages = Vec::with_capacity(raw.len());
        for entry in raw {
            match serde_json::from_str::<ChatMessage>(&entry) {
                Ok(message) => messages.push(message),
                Err(e) => {
                    warn!(
                        target: "chat.messages",
                        error = %e,
                        key = %key,
                        "Skipping corrupt log entry"
                    );
                }
            }
        }
        Ok(messages)
    }

    /// All unread counters for a recipient (sender -> count).
    pub async fn unread_counts(&self, recipient: &str) -> Result<HashMap<String, i64>, ChatError> {
        self.store.unread_counts(recipient).await
    }
}
