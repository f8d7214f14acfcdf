//! Bridges the Process Supervisor and the Transcript Watcher into broadcast
//! events for connected clients (§4.G).
//!
//! Two independent upstream channels feed this bridge: [`SupervisorEvent`]s
//! report process lifecycle transitions and permission prompts directly from
//! the wrapper's own stdout observation; [`WatchEvent`]s report filesystem
//! changes under the projects root. Transcript content itself is always
//! derived from the filesystem side (via [`Indexer::sync_file`]) rather than
//! from a `SessionRecord` event, so a session's on-disk write and the
//! wrapper's raw observation of the same line never race to index it twice.

use std::path::Path;
use std::sync::Arc;

use metrics::{counter, gauge};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use vigil_core::{ProjectId, SessionId};
use vigil_runtime::{process_snapshot_from_transition, ProcessState, Supervisor, SupervisorEvent};
use vigil_transcript::{parse_session_path, Indexer, LineRange, SessionPath, SyncOutcome, TranscriptStore};
use vigil_watch::{ChangeKind, WatchEvent};

use crate::events::ServerEvent;
use crate::metrics::{
    PROCESSES_ACTIVE, PROCESSES_KILLED_TOTAL, PROCESSES_SPAWNED_TOTAL, TRANSCRIPT_ITEMS_INDEXED_TOTAL,
    TRANSCRIPT_SYNC_TOTAL,
};
use crate::websocket::broadcast::BroadcastManager;

/// Consumes supervisor and watcher events and turns them into broadcasts.
pub struct EventBridge {
    supervisor_rx: mpsc::Receiver<SupervisorEvent>,
    watch_rx: mpsc::Receiver<WatchEvent>,
    supervisor: Arc<Supervisor>,
    store: Arc<TranscriptStore>,
    indexer: Arc<Indexer>,
    broadcast: Arc<BroadcastManager>,
    cancel: CancellationToken,
}

impl EventBridge {
    #[must_use]
    pub fn new(
        supervisor_rx: mpsc::Receiver<SupervisorEvent>,
        watch_rx: mpsc::Receiver<WatchEvent>,
        supervisor: Arc<Supervisor>,
        store: Arc<TranscriptStore>,
        indexer: Arc<Indexer>,
        broadcast: Arc<BroadcastManager>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            supervisor_rx,
            watch_rx,
            supervisor,
            store,
            indexer,
            broadcast,
            cancel,
        }
    }

    /// Runs the bridge until cancelled or both upstream channels close.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                event = self.supervisor_rx.recv() => match event {
                    Some(event) => self.handle_supervisor_event(event).await,
                    None => break,
                },
                event = self.watch_rx.recv() => match event {
                    Some(event) => self.handle_watch_event(event).await,
                    None => break,
                },
            }
        }
        debug!("event bridge shutting down");
    }

    async fn handle_supervisor_event(&self, event: SupervisorEvent) {
        match event {
            SupervisorEvent::ProcessState {
                session_id,
                project_id,
                model,
                permission_mode,
                state,
                rss_bytes,
                kill_reason,
            } => {
                match state {
                    ProcessState::Starting => counter!(PROCESSES_SPAWNED_TOTAL).increment(1),
                    ProcessState::Dead => {
                        let reason = kill_reason.as_deref().unwrap_or("exited");
                        counter!(PROCESSES_KILLED_TOTAL, "reason" => reason.to_string()).increment(1);
                    }
                    ProcessState::UserTurn | ProcessState::AssistantTurn => {}
                }
                gauge!(PROCESSES_ACTIVE).set(self.supervisor.active_count() as f64);

                let process = process_snapshot_from_transition(
                    session_id.clone(),
                    project_id,
                    model,
                    permission_mode,
                    state,
                    rss_bytes,
                    kill_reason,
                );
                self.broadcast
                    .broadcast_to_session(session_id.as_str(), &ServerEvent::ProcessState { process })
                    .await;
            }
            SupervisorEvent::PermissionRequested(request) => {
                // The prompt is already recorded on the process's registry
                // entry; re-read it rather than building a snapshot from the
                // event alone, so the broadcast carries the full picture
                // (model, permission mode, RSS) alongside the new prompt.
                if let Some(process) = self.supervisor.snapshot(&request.session_id) {
                    self.broadcast
                        .broadcast_to_session(request.session_id.as_str(), &ServerEvent::ProcessState { process })
                        .await;
                } else {
                    warn!(session_id = %request.session_id, "permission requested for unknown session");
                }
            }
            SupervisorEvent::SessionRecord { session_id, .. } => {
                // Diagnostic only: the wrapper's own view of the line it just
                // observed. Indexing happens from the filesystem side instead.
                debug!(%session_id, "observed raw session record from wrapper");
            }
        }
    }

    async fn handle_watch_event(&self, event: WatchEvent) {
        match event {
            WatchEvent::ProjectChanged { project_dir, change } => {
                self.handle_project_changed(&project_dir, change).await;
            }
            WatchEvent::SessionChanged { path, .. } | WatchEvent::SubagentChanged { path, .. } => {
                self.handle_session_file_changed(&path).await;
            }
        }
    }

    async fn handle_project_changed(&self, project_dir: &str, change: ChangeKind) {
        let project_id = ProjectId::from(project_dir);
        let stale = matches!(change, ChangeKind::Removed);
        if let Err(err) = self.store.set_project_stale(&project_id, stale) {
            warn!(%project_id, %err, "failed to update project staleness");
            return;
        }
        match self.store.get_project(&project_id) {
            Ok(Some(project)) => {
                self.broadcast.broadcast_all(&ServerEvent::ProjectUpdated { project }).await;
            }
            Ok(None) => {}
            Err(err) => warn!(%project_id, %err, "failed to reload project after change"),
        }
    }

    async fn handle_session_file_changed(&self, path: &Path) {
        let Some(session_id) = self.session_id_for(path) else {
            return;
        };
        let project_id = self.project_id_for(path);

        let project_existed = project_id
            .as_ref()
            .is_some_and(|id| matches!(self.store.get_project(id), Ok(Some(_))));
        let session_existed_before = matches!(self.store.get_session(&session_id), Ok(Some(_)));
        let high_water_before = self.store.max_line_number(&session_id).unwrap_or(0);

        let outcome = match self.indexer.sync_file(path) {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(path = %path.display(), %err, "failed to sync transcript file");
                counter!(TRANSCRIPT_SYNC_TOTAL, "outcome" => "error").increment(1);
                return;
            }
        };
        counter!(TRANSCRIPT_SYNC_TOTAL, "outcome" => sync_outcome_label(&outcome)).increment(1);

        let new_items = match outcome {
            SyncOutcome::Indexed { new_items } if new_items > 0 => new_items,
            _ => return,
        };
        counter!(TRANSCRIPT_ITEMS_INDEXED_TOTAL).increment(new_items);

        if let Some(project_id) = &project_id {
            if !project_existed {
                if let Ok(Some(project)) = self.store.get_project(project_id) {
                    self.broadcast.broadcast_all(&ServerEvent::ProjectAdded { project }).await;
                }
            }
        }

        match self.store.get_session(&session_id) {
            Ok(Some(session)) => {
                let event = if session_existed_before {
                    ServerEvent::SessionUpdated { session }
                } else {
                    ServerEvent::SessionAdded { session }
                };
                self.broadcast.broadcast_all(&event).await;
            }
            Ok(None) => return,
            Err(err) => {
                warn!(%session_id, %err, "failed to reload session after indexing");
                return;
            }
        }

        let range = LineRange::HalfOpen(high_water_before + 1, high_water_before + new_items + 1);
        match self.store.get_items(&session_id, &[range]) {
            Ok(items) if !items.is_empty() => {
                self.broadcast
                    .broadcast_all(&ServerEvent::SessionItemsAdded {
                        session_id,
                        items,
                        metadata_updates: Vec::new(),
                    })
                    .await;
            }
            Ok(_) => {}
            Err(err) => warn!(%session_id, %err, "failed to fetch newly indexed items"),
        }
    }

    fn session_id_for(&self, path: &Path) -> Option<SessionId> {
        match parse_session_path(self.indexer.projects_root(), path)? {
            SessionPath::Primary { session_id, .. } => Some(SessionId::from(session_id.as_str())),
            SessionPath::Subagent { agent_id, .. } => Some(SessionId::from(format!("agent-{agent_id}").as_str())),
        }
    }

    fn project_id_for(&self, path: &Path) -> Option<ProjectId> {
        match parse_session_path(self.indexer.projects_root(), path)? {
            SessionPath::Primary { project_dir, .. } | SessionPath::Subagent { project_dir, .. } => {
                Some(ProjectId::from(project_dir.as_str()))
            }
        }
    }
}

/// Metric label for a [`SyncOutcome`] (§10.2).
fn sync_outcome_label(outcome: &SyncOutcome) -> &'static str {
    match outcome {
        SyncOutcome::Ignored => "ignored",
        SyncOutcome::Unchanged => "unchanged",
        SyncOutcome::Missing => "missing",
        SyncOutcome::Indexed { .. } => "indexed",
    }
}
