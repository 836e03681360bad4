//! Chat Controller error types.
//!
//! Failures are scoped to the single event that triggered them: handlers log
//! and drop rather than crash the process. Nothing beyond the explicit
//! `user-busy` signal is surfaced to clients over the realtime channel.

use thiserror::Error;

/// Chat Controller error type.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Key-value store operation failed.
    #[error("Store error: {0}")]
    Store(String),

    /// Message (de)serialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
}
