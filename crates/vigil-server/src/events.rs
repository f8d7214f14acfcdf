//! Wire events the Broadcast Hub fans out to connected clients (§4.G).
//!
//! Project/session/item payloads are the same [`vigil_transcript::model`]
//! types the store already persists — there is no separate DTO layer to
//! keep in sync. Process payloads reuse [`vigil_runtime::ProcessSnapshot`].

use serde::Serialize;
use vigil_core::SessionId;
use vigil_runtime::ProcessSnapshot;
use vigil_transcript::{Project, Session, SessionItem};

/// Events emitted by the Broadcast Hub (§4.G "Emitted events").
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    ProjectAdded {
        project: Project,
    },
    ProjectUpdated {
        project: Project,
    },
    SessionAdded {
        session: Session,
    },
    SessionUpdated {
        session: Session,
    },
    /// Newly-appended items for a session, plus any already-sent items whose
    /// metadata changed underneath them (group bounds bridging a batch
    /// boundary, §4.C "second-pass grouping").
    SessionItemsAdded {
        session_id: SessionId,
        items: Vec<SessionItem>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        metadata_updates: Vec<SessionItem>,
    },
    ProcessState {
        process: ProcessSnapshot,
    },
    ActiveProcesses {
        processes: Vec<ProcessSnapshot>,
    },
    StartupProgress {
        phase: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Pong,
}

impl ServerEvent {
    /// The session this event is scoped to, or `None` if it should go to
    /// every connected client via `broadcast_all` (§4.G).
    #[must_use]
    pub fn session_id(&self) -> Option<&SessionId> {
        match self {
            Self::SessionAdded { session } | Self::SessionUpdated { session } => Some(&session.id),
            Self::SessionItemsAdded { session_id, .. } => Some(session_id),
            Self::ProcessState { process } => Some(&process.session_id),
            Self::ProjectAdded { .. }
            | Self::ProjectUpdated { .. }
            | Self::ActiveProcesses { .. }
            | Self::StartupProgress { .. }
            | Self::Pong => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::ProjectId;
    use vigil_runtime::{PermissionMode, ProcessState};

    fn snapshot(session_id: &str) -> ProcessSnapshot {
        ProcessSnapshot {
            session_id: SessionId::from(session_id),
            project_id: ProjectId::from("proj1"),
            state: ProcessState::UserTurn,
            model: "m".into(),
            permission_mode: PermissionMode::Default,
            pending_request: None,
            rss_bytes: None,
            rss_human: None,
            kill_reason: None,
        }
    }

    #[test]
    fn process_state_scopes_to_its_session() {
        let event = ServerEvent::ProcessState { process: snapshot("s1") };
        assert_eq!(event.session_id(), Some(&SessionId::from("s1")));
    }

    #[test]
    fn active_processes_has_no_session_scope() {
        let event = ServerEvent::ActiveProcesses { processes: vec![snapshot("s1")] };
        assert_eq!(event.session_id(), None);
    }

    #[test]
    fn pong_serializes_as_bare_type_tag() {
        let json = serde_json::to_value(ServerEvent::Pong).unwrap();
        assert_eq!(json, serde_json::json!({"type": "pong"}));
    }

    #[test]
    fn session_items_added_omits_empty_metadata_updates() {
        let event = ServerEvent::SessionItemsAdded {
            session_id: SessionId::from("s1"),
            items: Vec::new(),
            metadata_updates: Vec::new(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert!(json.get("metadataUpdates").is_none());
    }
}
