//! Process Supervisor / wrapper error taxonomy (§7).

use vigil_core::SessionId;

/// Errors raised by the child-process wrapper and the supervisor.
///
/// Per §7's propagation policy, the wrapper and supervisor never let these
/// escape as panics or unhandled rejections: every variant here corresponds
/// to a `DEAD` transition with `kill_reason` set, not a caller-visible
/// failure outside of [`RuntimeError::SessionNotFound`] /
/// [`RuntimeError::NoPendingRequest`], which are returned synchronously to
/// whoever issued the bad request.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// No process is registered for this session.
    #[error("no process registered for session {0}")]
    SessionNotFound(SessionId),

    /// The subprocess did not signal readiness within the startup deadline (§5).
    #[error("wrapper for session {0} failed to start: {1}")]
    StartupFailed(SessionId, String),

    /// The subprocess exited or its stdio pipe closed mid-stream.
    #[error("subprocess for session {0} failed mid-stream: {1}")]
    SubprocessFailed(SessionId, String),

    /// `resolve_pending_request` was called but the process has none outstanding.
    #[error("session {0} has no pending permission request")]
    NoPendingRequest(SessionId),

    /// A transcript record could not be parsed as the expected wire format.
    #[error("malformed record from session {0}: {1}")]
    MalformedRecord(SessionId, String),

    /// `SIGTERM`/`SIGKILL` could not be delivered to the process tree.
    #[error("failed to kill session {0}: {1}")]
    KillFailed(SessionId, String),

    /// Underlying I/O failure (pipe write, spawn).
    #[error("io error for session {0}: {1}")]
    Io(SessionId, std::io::Error),
}

impl RuntimeError {
    /// The session this error concerns, where applicable.
    #[must_use]
    pub fn session_id(&self) -> Option<&SessionId> {
        match self {
            Self::SessionNotFound(id)
            | Self::StartupFailed(id, _)
            | Self::SubprocessFailed(id, _)
            | Self::NoPendingRequest(id)
            | Self::MalformedRecord(id, _)
            | Self::KillFailed(id, _)
            | Self::Io(id, _) => Some(id),
        }
    }

    /// Whether this should drive the process to `DEAD` (§7 propagation policy),
    /// as opposed to being returned synchronously to the caller.
    #[must_use]
    pub fn is_fatal_to_process(&self) -> bool {
        !matches!(self, Self::SessionNotFound(_) | Self::NoPendingRequest(_))
    }
}
