//! Error types for the filesystem watcher (§4.D).

use thiserror::Error;

/// Errors raised by [`crate::watcher::Watcher`].
#[derive(Debug, Error)]
pub enum WatchError {
    /// The underlying OS-level watch (via `notify`) failed to start or to
    /// register the projects root.
    #[error("filesystem watch error: {0}")]
    Notify(#[from] notify::Error),
}

/// Convenience alias for watcher results.
pub type Result<T> = std::result::Result<T, WatchError>;
