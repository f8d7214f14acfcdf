//! Child-Process Wrapper (§4.E): owns one subprocess, its reader loop, and
//! permission arbitration for a single session.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use vigil_core::{ProjectId, RequestId, SessionId};
use vigil_transcript::TranscriptStore;

use crate::errors::RuntimeError;
use crate::types::{
    PendingPermissionRequest, PermissionMode, PermissionResponse, PermissionSuggestion,
    ProcessState,
};

/// Bootstrap parameters for spawning one subprocess (§6 "subprocess wire format"
/// is the subprocess's own concern; this is just what the wrapper needs to
/// start and address it).
#[derive(Clone, Debug)]
pub struct WrapperSpawnConfig {
    /// Executable to spawn.
    pub program: String,
    /// Arguments, in order.
    pub args: Vec<String>,
    /// Working directory for the subprocess.
    pub cwd: String,
    /// Initial model identifier.
    pub model: String,
    /// Initial permission mode.
    pub permission_mode: PermissionMode,
}

/// Events the wrapper emits as it observes the subprocess (consumed by the
/// supervisor to update the registry and forward to the Broadcast Hub).
#[derive(Debug)]
pub enum WrapperEvent {
    /// A raw transcript record line was read from the subprocess.
    Record(Value),
    /// A tool-permission prompt was raised and is awaiting a decision.
    PermissionRequested(PendingPermissionRequest),
    /// The process's lifecycle state changed.
    StateChanged(ProcessState),
    /// The process exited or was killed; wrapper is done.
    Exited {
        /// Human-readable reason, surfaced on the terminal broadcast.
        reason: Option<String>,
    },
}

/// A suggestion as the subprocess's permission system proposed it, before
/// normalization (§4.E step 1).
#[derive(Clone, Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSuggestion {
    /// The rule text, possibly covering multiple comma-joined rules.
    pub rule: String,
    /// Directories this suggestion would add to the allowed set.
    #[serde(default)]
    pub add_directories: Vec<String>,
    /// Directories this suggestion would remove from the allowed set.
    #[serde(default)]
    pub remove_directories: Vec<String>,
}

/// Normalize raw subprocess suggestions into the client-facing vocabulary
/// (§4.E step 1):
/// - strip `project_dir` from add/remove-directory suggestions, dropping the
///   suggestion entirely if nothing remains;
/// - split a suggestion naming multiple comma-joined rules into one
///   suggestion per rule;
/// - synthesize a wildcard MCP suggestion (`mcp__{server}__*`) alongside any
///   suggestion naming a single MCP tool;
/// - when the policy engine supplied no suggestions at all, synthesize a
///   default allow suggestion scoped to the specific tool that was invoked.
#[must_use]
pub fn normalize_suggestions(
    raw: &[RawSuggestion],
    project_dir: &str,
    tool_name: &str,
) -> Vec<PermissionSuggestion> {
    let mut out = Vec::new();

    for suggestion in raw {
        let add_dirs: Vec<&String> = suggestion
            .add_directories
            .iter()
            .filter(|d| d.as_str() != project_dir)
            .collect();
        let remove_dirs: Vec<&String> = suggestion
            .remove_directories
            .iter()
            .filter(|d| d.as_str() != project_dir)
            .collect();
        if (!suggestion.add_directories.is_empty() && add_dirs.is_empty())
            || (!suggestion.remove_directories.is_empty() && remove_dirs.is_empty())
        {
            continue;
        }

        for rule in suggestion.rule.split(',').map(str::trim).filter(|r| !r.is_empty()) {
            out.push(PermissionSuggestion {
                rule: rule.to_string(),
                session_only: false,
            });

            if let Some(server) = mcp_server_name(rule) {
                let wildcard = format!("mcp__{server}__*");
                if !out.iter().any(|s| s.rule == wildcard) {
                    out.push(PermissionSuggestion {
                        rule: wildcard,
                        session_only: false,
                    });
                }
            }
        }
    }

    if out.is_empty() && !tool_name.is_empty() && tool_name != "unknown" {
        out.push(PermissionSuggestion {
            rule: tool_name.to_string(),
            session_only: false,
        });
    }

    out
}

/// Extract the server name from an `mcp__{server}__{tool}` rule, if it is one.
fn mcp_server_name(rule: &str) -> Option<&str> {
    let rest = rule.strip_prefix("mcp__")?;
    let (server, _tool) = rest.split_once("__")?;
    (!server.is_empty()).then_some(server)
}

/// Owns one subprocess end-to-end: spawning, the stdout reader loop, stdin
/// writes, and single-slot permission arbitration (§4.E).
pub struct ChildWrapper {
    session_id: SessionId,
    project_id: ProjectId,
    child: Mutex<Option<Child>>,
    stdin: Mutex<Option<ChildStdin>>,
    pending: Mutex<Option<(RequestId, oneshot::Sender<PermissionResponse>)>>,
    events_tx: mpsc::Sender<WrapperEvent>,
    cancel: CancellationToken,
    /// Last lifecycle state this wrapper has itself emitted, so the reader
    /// loop only notifies on an actual change (`transition` always resets
    /// both clocks, so a redundant emission would mask the absolute timeout).
    state: Mutex<ProcessState>,
    /// Reason stashed by [`Self::kill`] before cancellation, so the reader
    /// loop's cancellation branch can carry it instead of reporting `None`.
    kill_reason: Mutex<Option<String>>,
    store: Arc<TranscriptStore>,
    plans_dir: String,
}

impl ChildWrapper {
    /// Spawn the subprocess and start its stdout reader loop in the
    /// background. Returns once the process has been spawned; readiness is
    /// signaled asynchronously via [`WrapperEvent::StateChanged`] as the
    /// subprocess's stdout stream produces assistant activity (§4.E).
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::StartupFailed`] if the OS refuses to spawn
    /// the process (missing binary, permissions).
    pub async fn start(
        session_id: SessionId,
        project_id: ProjectId,
        config: WrapperSpawnConfig,
        events_tx: mpsc::Sender<WrapperEvent>,
        store: Arc<TranscriptStore>,
        plans_dir: String,
    ) -> Result<Arc<Self>, RuntimeError> {
        let mut cmd = Command::new(&config.program);
        cmd.args(&config.args)
            .current_dir(&config.cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false);

        let mut child = cmd
            .spawn()
            .map_err(|e| RuntimeError::StartupFailed(session_id.clone(), e.to_string()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RuntimeError::StartupFailed(session_id.clone(), "no stdout pipe".into()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RuntimeError::StartupFailed(session_id.clone(), "no stdin pipe".into()))?;

        let wrapper = Arc::new(Self {
            session_id: session_id.clone(),
            project_id,
            child: Mutex::new(Some(child)),
            stdin: Mutex::new(Some(stdin)),
            pending: Mutex::new(None),
            events_tx,
            cancel: CancellationToken::new(),
            state: Mutex::new(ProcessState::Starting),
            kill_reason: Mutex::new(None),
            store,
            plans_dir,
        });

        let reader_wrapper = Arc::clone(&wrapper);
        tokio::spawn(async move {
            reader_wrapper.run_reader_loop(stdout).await;
        });

        Ok(wrapper)
    }

    /// Emit a `StateChanged` event and update the locally tracked state,
    /// unless the wrapper is already in `next` (§4.E: avoids resetting
    /// `state_entered_at` on every assistant-turn record, which would
    /// otherwise make the absolute `ASSISTANT_TURN` timeout unreachable).
    async fn transition_to(&self, next: ProcessState) {
        let changed = {
            let mut state = self.state.lock();
            if *state == next {
                false
            } else {
                *state = next;
                true
            }
        };
        if changed {
            let _ = self.events_tx.send(WrapperEvent::StateChanged(next)).await;
        }
    }

    /// Reader loop: consumes one JSON record per line from the subprocess's
    /// stdout, classifying permission-request and result records specially
    /// and forwarding every record as [`WrapperEvent::Record`] (§4.E).
    ///
    /// On any non-result record, transitions to `ASSISTANT_TURN` (unless
    /// already there). On a result record, transitions to `USER_TURN` on
    /// success or terminates the loop on an error flag. Terminates on EOF
    /// (synthesizing a "stream closed" reason, since a clean end of turn
    /// always arrives via a result record first), a cancellation, or a read
    /// error, in every case emitting exactly one [`WrapperEvent::Exited`].
    async fn run_reader_loop(self: Arc<Self>, stdout: tokio::process::ChildStdout) {
        let mut lines = BufReader::new(stdout).lines();

        let exit_reason = loop {
            tokio::select! {
                () = self.cancel.cancelled() => break self.kill_reason.lock().clone(),
                line = lines.next_line() => match line {
                    Ok(Some(raw)) => {
                        if let Some(reason) = self.handle_line(&raw).await {
                            break Some(reason);
                        }
                    }
                    Ok(None) => break Some("subprocess stream closed without a result".to_string()),
                    Err(e) => break Some(format!("stdout read error: {e}")),
                },
            }
        };

        if !self.cancel.is_cancelled() {
            self.kill_tree(Duration::from_secs(2)).await;
        }
        *self.state.lock() = ProcessState::Dead;

        let _ = self
            .events_tx
            .send(WrapperEvent::Exited { reason: exit_reason })
            .await;
    }

    /// Handle one parsed stdout line. Returns `Some(reason)` when the line
    /// means the process must be considered dead (an error-flagged result).
    async fn handle_line(&self, raw: &str) -> Option<String> {
        let value: Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(e) => {
                warn!(session_id = %self.session_id, error = %e, "malformed transcript line");
                return None;
            }
        };

        let record_type = value.get("type").and_then(Value::as_str).map(str::to_string);

        if record_type.as_deref() == Some("permission_request") {
            self.handle_permission_request(value).await;
            return None;
        }

        if record_type.as_deref() == Some("result") {
            let is_error = value.get("is_error").and_then(Value::as_bool).unwrap_or(false);
            let result_text = value.get("result").and_then(Value::as_str).map(str::to_string);
            let _ = self.events_tx.send(WrapperEvent::Record(value)).await;
            if is_error {
                return Some(result_text.unwrap_or_else(|| "assistant reported an error".to_string()));
            }
            self.transition_to(ProcessState::UserTurn).await;
            return None;
        }

        let _ = self.events_tx.send(WrapperEvent::Record(value)).await;
        self.transition_to(ProcessState::AssistantTurn).await;
        None
    }

    async fn handle_permission_request(&self, value: Value) {
        let tool_name = value
            .get("toolName")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        let tool_input = value.get("input").cloned().unwrap_or(Value::Null);
        let raw_suggestions: Vec<RawSuggestion> = value
            .get("suggestions")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();
        let suggestions = normalize_suggestions(&raw_suggestions, &self.project_id.to_string(), &tool_name);

        let request_id = RequestId::new();
        let request = PendingPermissionRequest {
            request_id: request_id.clone(),
            session_id: self.session_id.clone(),
            tool_name: tool_name.clone(),
            tool_input: tool_input.clone(),
            suggestions,
        };

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock();
            *pending = Some((request_id, tx));
        }

        if self
            .events_tx
            .send(WrapperEvent::PermissionRequested(request))
            .await
            .is_err()
        {
            return;
        }

        match rx.await {
            Ok(response) => {
                self.maybe_rewrite_plan(&tool_name, &tool_input, &response).await;
                self.write_permission_decision(&response).await;
            }
            Err(_) => debug!(session_id = %self.session_id, "permission request dropped without a decision"),
        }
    }

    /// Exit-plan-mode side effect (§4.E step 5): when the client rewrote the
    /// plan text before approving, overwrite the plan file for this
    /// session's most recent planning artifact. Never fails the response —
    /// a missing slug or plan file is logged and skipped.
    async fn maybe_rewrite_plan(&self, tool_name: &str, requested_input: &Value, response: &PermissionResponse) {
        if tool_name != "ExitPlanMode" {
            return;
        }
        let PermissionResponse::AllowOnce { updated_input: Some(updated_input) } = response else {
            return;
        };
        let granted_plan = updated_input.get("plan");
        if granted_plan.is_none() || granted_plan == requested_input.get("plan") {
            return;
        }
        let Some(plan_text) = granted_plan.and_then(Value::as_str) else {
            return;
        };

        let slug = match self.store.last_session_slug(&self.session_id) {
            Ok(Some(slug)) => slug,
            Ok(None) => {
                debug!(session_id = %self.session_id, "cannot update plan: no slug found in session items");
                return;
            }
            Err(e) => {
                warn!(session_id = %self.session_id, error = %e, "failed to look up session slug for plan update");
                return;
            }
        };

        let plan_path = std::path::Path::new(&self.plans_dir).join(format!("{slug}.md"));
        if !plan_path.exists() {
            debug!(session_id = %self.session_id, path = %plan_path.display(), "plan file does not exist, skipping update");
            return;
        }
        if let Err(e) = tokio::fs::write(&plan_path, plan_text).await {
            warn!(session_id = %self.session_id, error = %e, "failed to write updated plan");
        }
    }

    async fn write_permission_decision(&self, response: &PermissionResponse) {
        let payload = serde_json::json!({ "type": "permission_response", "decision": response });
        self.write_line(&payload.to_string()).await;
    }

    /// Send a user message to the subprocess (§4.E public contract). In
    /// `USER_TURN`, additionally transitions to `ASSISTANT_TURN` and notifies.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Io`] if the stdin pipe write fails.
    pub async fn send(&self, message: &Value) -> Result<(), RuntimeError> {
        self.write_line(&message.to_string()).await;
        if *self.state.lock() == ProcessState::UserTurn {
            self.transition_to(ProcessState::AssistantTurn).await;
        }
        Ok(())
    }

    async fn write_line(&self, line: &str) {
        let stdin = {
            let mut guard = self.stdin.lock();
            guard.take()
        };
        let Some(mut stdin) = stdin else {
            warn!(session_id = %self.session_id, "attempted write after stdin closed");
            return;
        };
        let mut buf = line.as_bytes().to_vec();
        buf.push(b'\n');
        if let Err(e) = stdin.write_all(&buf).await {
            error!(session_id = %self.session_id, error = %e, "stdin write failed");
        }
        let mut guard = self.stdin.lock();
        *guard = Some(stdin);
    }

    /// Resolve the single outstanding permission request, if any (§4.E).
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::NoPendingRequest`] if there is none, or if
    /// `request_id` does not match the outstanding one (stale client reply).
    pub fn resolve_pending_request(
        &self,
        request_id: &RequestId,
        response: PermissionResponse,
    ) -> Result<(), RuntimeError> {
        let mut pending = self.pending.lock();
        match pending.take() {
            Some((id, tx)) if &id == request_id => {
                let _ = tx.send(response);
                Ok(())
            }
            Some(other) => {
                *pending = Some(other);
                Err(RuntimeError::NoPendingRequest(self.session_id.clone()))
            }
            None => Err(RuntimeError::NoPendingRequest(self.session_id.clone())),
        }
    }

    /// Whether a permission request is currently outstanding (§4.F timeout
    /// sweep exemption: such processes are never killed for inactivity).
    #[must_use]
    pub fn has_pending_request(&self) -> bool {
        self.pending.lock().is_some()
    }

    /// Change the permission mode for subsequent tool calls.
    pub async fn set_permission_mode(&self, mode: PermissionMode) {
        let payload = serde_json::json!({ "type": "set_permission_mode", "mode": mode });
        self.write_line(&payload.to_string()).await;
    }

    /// Change the model for subsequent turns.
    pub async fn set_model(&self, model: &str) {
        let payload = serde_json::json!({ "type": "set_model", "model": model });
        self.write_line(&payload.to_string()).await;
    }

    /// Kill the subprocess and its full descendant tree (§4.E cancellation
    /// semantics, §5 kill timeouts). `reason` is stashed before cancellation
    /// so the reader loop's `Exited` event carries it through to the
    /// terminal `Dead` broadcast, instead of the cancellation racing ahead
    /// with no reason attached.
    ///
    /// Enumerates children before sending any signal (a dead parent cannot
    /// be asked for its children), `SIGTERM`s children then the parent, waits
    /// up to `graceful_wait`, then `SIGKILL`s whatever survives. Runs on a
    /// blocking thread so the cooperative scheduler is never held up by a
    /// stuck `waitpid`.
    pub async fn kill(&self, graceful_wait: Duration, reason: Option<String>) {
        *self.kill_reason.lock() = reason;
        self.cancel.cancel();
        self.kill_tree(graceful_wait).await;
    }

    async fn kill_tree(&self, graceful_wait: Duration) {
        let pid = {
            let child = self.child.lock();
            child.as_ref().and_then(tokio::process::Child::id)
        };
        let Some(pid) = pid else { return };

        tokio::task::spawn_blocking(move || kill_tree_blocking(pid, graceful_wait))
            .await
            .ok();

        let mut child = self.child.lock().take();
        if let Some(child) = &mut child {
            let _ = child.start_kill();
        }
    }
}

#[cfg(unix)]
fn kill_tree_blocking(root_pid: u32, graceful_wait: Duration) {
    use std::thread::sleep;

    let mut system = sysinfo::System::new();
    system.refresh_processes(sysinfo::ProcessesToUpdate::All, true);

    let descendants = collect_descendants(&system, root_pid);
    let mut targets: Vec<u32> = descendants;
    targets.push(root_pid);

    for pid in &targets {
        send_signal(*pid, sysinfo::Signal::Term);
    }

    sleep(graceful_wait);

    system.refresh_processes(sysinfo::ProcessesToUpdate::All, true);
    for pid in &targets {
        if system.process(sysinfo::Pid::from_u32(*pid)).is_some() {
            send_signal(*pid, sysinfo::Signal::Kill);
        }
    }
}

#[cfg(not(unix))]
fn kill_tree_blocking(_root_pid: u32, _graceful_wait: Duration) {}

#[cfg(unix)]
fn collect_descendants(system: &sysinfo::System, root_pid: u32) -> Vec<u32> {
    let root = sysinfo::Pid::from_u32(root_pid);
    let mut result = Vec::new();
    let mut frontier = vec![root];
    while let Some(parent) = frontier.pop() {
        for (pid, process) in system.processes() {
            if process.parent() == Some(parent) {
                result.push(pid.as_u32());
                frontier.push(*pid);
            }
        }
    }
    result
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: sysinfo::Signal) {
    let mut system = sysinfo::System::new();
    system.refresh_processes(sysinfo::ProcessesToUpdate::All, true);
    if let Some(process) = system.process(sysinfo::Pid::from_u32(pid)) {
        let _ = process.kill_with(signal);
    }
}
