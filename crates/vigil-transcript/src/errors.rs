//! Error types for the transcript store and incremental indexer (§7).

use thiserror::Error;
use vigil_core::SessionId;

/// Errors raised by the transcript store and indexer.
#[derive(Debug, Error)]
pub enum TranscriptError {
    /// `SQLite` database error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection pool error.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// JSON serialization/deserialization error of a transcript record.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Filesystem I/O failure reading a transcript file.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Schema migration failed.
    #[error("migration error: {message}")]
    Migration {
        /// Describes which migration failed and why.
        message: String,
    },

    /// A subagent's recorded parent session is not known to the store (§3 invariant).
    #[error("parent session {0} not found for subagent propagation")]
    ParentSessionNotFound(SessionId),

    /// Invariant violation caught by a caller-facing check (§7: programmer-error conditions).
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

/// Convenience type alias for transcript store/indexer results.
pub type Result<T> = std::result::Result<T, TranscriptError>;
