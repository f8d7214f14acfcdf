//! Shared error taxonomy for storage and parsing seams (§7, §10.2).
//!
//! Subsystem-specific errors (wrapper/supervisor, broadcast hub) live in
//! their own crates; this is the handful of error conditions shared by
//! anything that touches the embedded store or transcript bytes.

use thiserror::Error;

/// Errors shared by storage and parsing seams across vigil crates.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The embedded relational store rejected an operation.
    #[error("persistence error: {0}")]
    Persistence(#[from] rusqlite::Error),

    /// A transcript record or config value failed to parse as JSON.
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// Filesystem I/O failure (transient per §7: log and retry on next event).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A programmer-error invariant violation (§7: may raise to the caller).
    #[error("invariant violation: {0}")]
    Invariant(String),
}

impl CoreError {
    /// Construct an invariant-violation error.
    #[must_use]
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::Invariant(message.into())
    }

    /// Whether this error represents transient I/O that a caller should
    /// treat as "skip this cycle, retry on the next watcher event" (§7).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invariant_constructor() {
        let err = CoreError::invariant("subagent without parent session");
        assert!(matches!(err, CoreError::Invariant(_)));
        assert_eq!(
            err.to_string(),
            "invariant violation: subagent without parent session"
        );
    }

    #[test]
    fn io_is_transient() {
        let err = CoreError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert!(err.is_transient());
    }

    #[test]
    fn invariant_is_not_transient() {
        let err = CoreError::invariant("bad state");
        assert!(!err.is_transient());
    }

    #[test]
    fn parse_error_from_serde() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: CoreError = json_err.into();
        assert!(matches!(err, CoreError::Parse(_)));
    }
}
