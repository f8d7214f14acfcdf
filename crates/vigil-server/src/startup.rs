//! Startup-phase progress tracker (§4.G: "current startup-phase progress,"
//! one of the two small state bags a newly-joined client snapshots).
//!
//! The initial projects-root scan on boot runs ahead of any client connecting;
//! this tracker lets that scan publish its phase so a client that joins
//! mid-sweep gets a meaningful `startup_progress` snapshot instead of silence.

use parking_lot::RwLock;

use crate::events::ServerEvent;

#[derive(Clone, Debug, PartialEq)]
struct Progress {
    phase: String,
    message: Option<String>,
}

/// Process-wide startup progress, read at WebSocket join time (§4.G).
pub struct StartupProgress {
    state: RwLock<Progress>,
}

impl StartupProgress {
    /// Starts in the `"scanning"` phase; the daemon's initial sweep advances
    /// it and finally sets `"ready"` once the projects root has been walked.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RwLock::new(Progress { phase: "scanning".to_string(), message: None }),
        }
    }

    pub fn set(&self, phase: impl Into<String>, message: Option<String>) {
        *self.state.write() = Progress { phase: phase.into(), message };
    }

    #[must_use]
    pub fn snapshot(&self) -> ServerEvent {
        let state = self.state.read();
        ServerEvent::StartupProgress { phase: state.phase.clone(), message: state.message.clone() }
    }
}

impl Default for StartupProgress {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_in_scanning_phase() {
        let progress = StartupProgress::new();
        let ServerEvent::StartupProgress { phase, message } = progress.snapshot() else {
            panic!("expected StartupProgress event");
        };
        assert_eq!(phase, "scanning");
        assert!(message.is_none());
    }

    #[test]
    fn set_updates_snapshot() {
        let progress = StartupProgress::new();
        progress.set("ready", None);
        let ServerEvent::StartupProgress { phase, .. } = progress.snapshot() else {
            panic!("expected StartupProgress event");
        };
        assert_eq!(phase, "ready");
    }

    #[test]
    fn set_with_message() {
        let progress = StartupProgress::new();
        progress.set("indexing", Some("42/100 sessions".to_string()));
        let ServerEvent::StartupProgress { phase, message } = progress.snapshot() else {
            panic!("expected StartupProgress event");
        };
        assert_eq!(phase, "indexing");
        assert_eq!(message.as_deref(), Some("42/100 sessions"));
    }
}
