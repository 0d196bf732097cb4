//! Error types for novax-core

use crate::types::SessionId;
use thiserror::Error;

/// Which half of a session completion is missing after a partial failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartialStage {
    /// Score points are stored but the record is still in progress.
    StatusPending,
    /// The record is completed but its transcript buffer was not purged.
    BufferRetained,
}

impl PartialStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PartialStage::StatusPending => "status_pending",
            PartialStage::BufferRetained => "buffer_retained",
        }
    }
}

impl std::fmt::Display for PartialStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for the novax-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Transcript buffer store error
    #[error("transcript buffer error: {0}")]
    Buffer(String),

    /// Redis transport error
    #[cfg(feature = "redis")]
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// No live record or buffer for the session
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    /// Completion attempted on a session without transcript entries
    #[error("session {0} has no transcript to assess")]
    EmptySession(SessionId),

    /// The scoring call failed or returned an unusable score vector
    #[error("assessment failed: {0}")]
    Assessment(String),

    /// Completion stopped halfway; the session needs reconciliation
    #[error("session {session_id} partially completed ({stage}): {reason}")]
    PartialCompletion {
        session_id: SessionId,
        stage: PartialStage,
        reason: String,
    },

    /// The session was already completed
    #[error("session {0} is already completed")]
    SessionCompleted(SessionId),

    /// Lost a race against another start/complete/abandon
    #[error("concurrency conflict: {0}")]
    ConcurrencyConflict(String),
}

impl Error {
    /// Whether the caller may retry the failed operation as-is.
    ///
    /// Partial completions are never retryable: re-running completion
    /// would score the session twice.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Database(_) | Error::Io(_) | Error::Buffer(_) => true,
            #[cfg(feature = "redis")]
            Error::Redis(_) => true,
            Error::Assessment(_) | Error::ConcurrencyConflict(_) => true,
            Error::Json(_)
            | Error::Config(_)
            | Error::SessionNotFound(_)
            | Error::EmptySession(_)
            | Error::PartialCompletion { .. }
            | Error::SessionCompleted(_) => false,
        }
    }
}

/// Result type alias for novax-core
pub type Result<T> = std::result::Result<T, Error>;
