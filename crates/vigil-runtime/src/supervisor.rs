//! Process Supervisor (§4.F): registry of all live processes, the public
//! mutation surface, and the timeout sweep.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use vigil_core::{ProjectId, RequestId, SessionId};
use vigil_settings::SupervisorConfig;
use vigil_transcript::TranscriptStore;

use crate::errors::RuntimeError;
use crate::types::{PermissionMode, PermissionResponse, ProcessRecord, ProcessSnapshot, ProcessState};
use crate::wrapper::{ChildWrapper, WrapperEvent, WrapperSpawnConfig};

/// Events the supervisor emits for the Broadcast Hub to fan out (§4.G).
#[derive(Debug, Clone)]
pub enum SupervisorEvent {
    /// A process's lifecycle state (and optionally kill reason) changed.
    ProcessState {
        /// Session the state belongs to.
        session_id: SessionId,
        /// Project the session belongs to, so subscribers don't need a
        /// second lookup to render a `ProcessSnapshot` (§4.G).
        project_id: ProjectId,
        /// Model in effect at the time of this transition.
        model: String,
        /// Permission mode in effect at the time of this transition.
        permission_mode: PermissionMode,
        /// New lifecycle state.
        state: ProcessState,
        /// Resident set size in bytes, sampled at broadcast time (§10.5).
        rss_bytes: Option<u64>,
        /// Present only when `state == Dead` and the death was not a clean exit.
        kill_reason: Option<String>,
    },
    /// A transcript record arrived for a session (forwarded for indexing).
    SessionRecord {
        /// Session the record belongs to.
        session_id: SessionId,
        /// The raw parsed record.
        record: Value,
    },
    /// A tool-permission prompt needs a client decision.
    PermissionRequested(crate::types::PendingPermissionRequest),
}

/// Registry of all supervised processes plus the mutation surface described
/// in §4.F's public contract.
pub struct Supervisor {
    records: DashMap<SessionId, Arc<Mutex<ProcessRecord>>>,
    wrappers: DashMap<SessionId, Arc<ChildWrapper>>,
    config: SupervisorConfig,
    events_tx: mpsc::Sender<SupervisorEvent>,
    cancel: CancellationToken,
    store: Arc<TranscriptStore>,
    plans_dir: String,
}

impl Supervisor {
    /// Construct a supervisor. `events_tx` is the channel the Broadcast Hub
    /// reads from to learn about state changes and records. `store` and
    /// `plans_dir` are handed down to every spawned wrapper for the
    /// exit-plan-mode plan-rewrite side effect (§4.E step 5).
    #[must_use]
    pub fn new(
        config: SupervisorConfig,
        events_tx: mpsc::Sender<SupervisorEvent>,
        store: Arc<TranscriptStore>,
        plans_dir: String,
    ) -> Arc<Self> {
        Arc::new(Self {
            records: DashMap::new(),
            wrappers: DashMap::new(),
            config,
            events_tx,
            cancel: CancellationToken::new(),
            store,
            plans_dir,
        })
    }

    /// Spawn the timeout sweep as a background task (§4.F tunables table).
    /// Returns the `JoinHandle` so the caller can register it for graceful
    /// shutdown (§5).
    pub fn spawn_sweep(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let supervisor = Arc::clone(self);
        tokio::spawn(async move { supervisor.run_sweep().await })
    }

    async fn run_sweep(self: Arc<Self>) {
        let mut ticker = interval(Duration::from_secs(self.config.sweep_interval_secs));
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                _ = ticker.tick() => self.sweep_once().await,
            }
        }
    }

    /// Run one sweep pass: kill every process whose state has breached its
    /// timeout, skipping any with an outstanding permission request (§4.F).
    async fn sweep_once(&self) {
        let now = Instant::now();
        let mut to_kill: Vec<SessionId> = Vec::new();

        for entry in &self.records {
            let session_id = entry.key().clone();
            let record = entry.value().lock();
            if record.state.is_terminal() {
                continue;
            }
            let has_pending = self
                .wrappers
                .get(&session_id)
                .is_some_and(|w| w.has_pending_request());
            if has_pending {
                continue;
            }
            if self.is_timed_out(&record, now) {
                to_kill.push(session_id.clone());
            }
        }

        for session_id in to_kill {
            warn!(%session_id, "timeout sweep killing stale process");
            self.kill_process(&session_id, Some("timed out".to_string())).await;
        }
    }

    fn is_timed_out(&self, record: &ProcessRecord, now: Instant) -> bool {
        let idle = now.duration_since(record.last_activity_at);
        let age = now.duration_since(record.state_entered_at);
        match record.state {
            ProcessState::Starting => age >= Duration::from_secs(self.config.timeout_starting_secs),
            ProcessState::UserTurn => idle >= Duration::from_secs(self.config.timeout_user_turn_secs),
            ProcessState::AssistantTurn => {
                idle >= Duration::from_secs(self.config.timeout_assistant_turn_secs)
                    || age >= Duration::from_secs(self.config.timeout_assistant_turn_absolute_secs)
            }
            ProcessState::Dead => false,
        }
    }

    /// Create and register a new supervised session (§4.F).
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::StartupFailed`] if the subprocess could not
    /// be spawned.
    pub async fn create_session(
        self: &Arc<Self>,
        session_id: SessionId,
        project_id: ProjectId,
        spawn: WrapperSpawnConfig,
    ) -> Result<(), RuntimeError> {
        let record = Arc::new(Mutex::new(ProcessRecord::new(
            session_id.clone(),
            project_id.clone(),
            spawn.model.clone(),
            spawn.permission_mode,
        )));
        self.records.insert(session_id.clone(), Arc::clone(&record));

        let (wrapper_tx, mut wrapper_rx) = mpsc::channel(256);
        let wrapper = ChildWrapper::start(
            session_id.clone(),
            project_id,
            spawn,
            wrapper_tx,
            Arc::clone(&self.store),
            self.plans_dir.clone(),
        )
        .await?;
        self.wrappers.insert(session_id.clone(), wrapper);

        let supervisor = Arc::clone(self);
        let hook_session_id = session_id.clone();
        tokio::spawn(async move {
            while let Some(event) = wrapper_rx.recv().await {
                supervisor.on_wrapper_event(&hook_session_id, event).await;
            }
        });

        Ok(())
    }

    /// The state-change hook (§4.F): runs for every event the wrapper emits,
    /// updates the registry, and forwards to the Broadcast Hub. Three steps:
    /// (1) look up the record by session id (not by holding a reference into
    /// the wrapper, avoiding an ownership cycle, §9); (2) mutate/transition
    /// it; (3) on `Dead`, remove both registry entries only if the record
    /// still *is* this same generation (identity check, not a second key
    /// lookup) — a session may have been deleted and recreated between the
    /// event firing and this handler running.
    async fn on_wrapper_event(&self, session_id: &SessionId, event: WrapperEvent) {
        let Some(record_ref) = self.records.get(session_id) else {
            return;
        };
        let record_arc = Arc::clone(&record_ref);
        drop(record_ref);

        match event {
            WrapperEvent::Record(value) => {
                {
                    let mut record = record_arc.lock();
                    record.touch();
                }
                let _ = self
                    .events_tx
                    .send(SupervisorEvent::SessionRecord {
                        session_id: session_id.clone(),
                        record: value,
                    })
                    .await;
            }
            WrapperEvent::PermissionRequested(request) => {
                {
                    let mut record = record_arc.lock();
                    record.pending_request = Some(request.clone());
                    record.touch();
                }
                let _ = self
                    .events_tx
                    .send(SupervisorEvent::PermissionRequested(request))
                    .await;
            }
            WrapperEvent::StateChanged(state) => {
                let rss = self.sample_rss(session_id);
                let (project_id, model, permission_mode) = {
                    let mut record = record_arc.lock();
                    record.transition(state);
                    record.pending_request = None;
                    (record.project_id.clone(), record.model.clone(), record.permission_mode)
                };
                self.broadcast_state(session_id, project_id, model, permission_mode, state, rss, None)
                    .await;
            }
            WrapperEvent::Exited { reason } => {
                let rss = None;
                let (project_id, model, permission_mode) = {
                    let mut record = record_arc.lock();
                    record.transition(ProcessState::Dead);
                    record.kill_reason.clone_from(&reason);
                    (record.project_id.clone(), record.model.clone(), record.permission_mode)
                };
                self.broadcast_state(
                    session_id,
                    project_id,
                    model,
                    permission_mode,
                    ProcessState::Dead,
                    rss,
                    reason,
                )
                .await;

                if self
                    .records
                    .get(session_id)
                    .is_some_and(|r| Arc::ptr_eq(&r, &record_arc))
                {
                    self.records.remove(session_id);
                    self.wrappers.remove(session_id);
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn broadcast_state(
        &self,
        session_id: &SessionId,
        project_id: ProjectId,
        model: String,
        permission_mode: PermissionMode,
        state: ProcessState,
        rss_bytes: Option<u64>,
        kill_reason: Option<String>,
    ) {
        let _ = self
            .events_tx
            .send(SupervisorEvent::ProcessState {
                session_id: session_id.clone(),
                project_id,
                model,
                permission_mode,
                state,
                rss_bytes,
                kill_reason,
            })
            .await;
    }

    /// Sample resident set size for a process by pid (§10.5); `None` once
    /// the process has no pid yet or has already exited.
    fn sample_rss(&self, session_id: &SessionId) -> Option<u64> {
        let record = self.records.get(session_id)?;
        let pid = record.lock().pid?;
        let mut system = sysinfo::System::new();
        system.refresh_processes(sysinfo::ProcessesToUpdate::All, true);
        system
            .process(sysinfo::Pid::from_u32(pid))
            .map(sysinfo::Process::memory)
    }

    /// Forward a message to a session's subprocess (§4.F).
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::SessionNotFound`] if no process is registered.
    pub async fn send_to_session(&self, session_id: &SessionId, message: Value) -> Result<(), RuntimeError> {
        let wrapper = self
            .wrappers
            .get(session_id)
            .map(|w| Arc::clone(&w))
            .ok_or_else(|| RuntimeError::SessionNotFound(session_id.clone()))?;
        wrapper.send(&message).await?;
        if let Some(record) = self.records.get(session_id) {
            record.lock().touch();
        }
        Ok(())
    }

    /// Resolve the single outstanding permission request for a session (§4.F).
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::SessionNotFound`] or
    /// [`RuntimeError::NoPendingRequest`].
    pub fn resolve_pending_request(
        &self,
        session_id: &SessionId,
        request_id: &RequestId,
        response: PermissionResponse,
    ) -> Result<(), RuntimeError> {
        let wrapper = self
            .wrappers
            .get(session_id)
            .map(|w| Arc::clone(&w))
            .ok_or_else(|| RuntimeError::SessionNotFound(session_id.clone()))?;
        wrapper.resolve_pending_request(request_id, response)?;
        if let Some(record) = self.records.get(session_id) {
            record.lock().pending_request = None;
        }
        Ok(())
    }

    /// Update a session's permission mode or model without sending a turn.
    pub async fn set_permission_mode(&self, session_id: &SessionId, mode: PermissionMode) -> Result<(), RuntimeError> {
        let wrapper = self
            .wrappers
            .get(session_id)
            .map(|w| Arc::clone(&w))
            .ok_or_else(|| RuntimeError::SessionNotFound(session_id.clone()))?;
        wrapper.set_permission_mode(mode).await;
        if let Some(record) = self.records.get(session_id) {
            record.lock().permission_mode = mode;
        }
        Ok(())
    }

    /// Record that a session is still alive without sending it anything
    /// (§4.F `touch`, used by clients that are merely viewing a session).
    pub fn touch(&self, session_id: &SessionId) {
        if let Some(record) = self.records.get(session_id) {
            record.lock().touch();
        }
    }

    /// Kill a session's process tree (§4.E cancellation semantics). The
    /// reason is passed straight into the wrapper, which carries it through
    /// to the `Exited` event the reader loop emits on cancellation — doing
    /// this after the kill would race the registry-cleanup path in
    /// [`Self::on_wrapper_event`] and silently drop the reason.
    pub async fn kill_process(&self, session_id: &SessionId, reason: Option<String>) {
        let Some(wrapper) = self.wrappers.get(session_id).map(|w| Arc::clone(&w)) else {
            return;
        };
        wrapper
            .kill(Duration::from_secs(self.config.kill_graceful_wait_secs), reason)
            .await;
    }

    /// Number of non-terminal processes currently registered.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.records
            .iter()
            .filter(|e| !e.value().lock().state.is_terminal())
            .count()
    }

    /// Snapshot one process, sampling its RSS fresh (§10.5). `None` if no
    /// such session is registered.
    #[must_use]
    pub fn snapshot(&self, session_id: &SessionId) -> Option<ProcessSnapshot> {
        let record_arc = Arc::clone(&*self.records.get(session_id)?);
        let rss = self.sample_rss(session_id);
        let record = record_arc.lock();
        Some(ProcessSnapshot::from_record(&record, rss))
    }

    /// Snapshot every non-terminal process (§4.G `active_processes` initial
    /// sync, §8 law: "a process state change emitted to clients never
    /// precedes the state change being observable through
    /// `get_active_processes`").
    #[must_use]
    pub fn active_snapshots(&self) -> Vec<ProcessSnapshot> {
        let ids: Vec<SessionId> = self
            .records
            .iter()
            .filter(|e| !e.value().lock().state.is_terminal())
            .map(|e| e.key().clone())
            .collect();
        ids.iter().filter_map(|id| self.snapshot(id)).collect()
    }

    /// Stop the sweep and kill every live process, bounded by
    /// `shutdown_grace_secs` (§5 cancellation sequence step 3).
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let ids: Vec<SessionId> = self.records.iter().map(|e| e.key().clone()).collect();
        let grace = Duration::from_secs(self.config.shutdown_grace_secs);
        let _ = tokio::time::timeout(grace, async {
            for id in ids {
                self.kill_process(&id, Some("shutdown".to_string())).await;
            }
        })
        .await;
    }
}
