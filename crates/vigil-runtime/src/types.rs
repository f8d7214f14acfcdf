//! Process Supervisor data model (§3 Process Record / Pending Permission Request).

use std::time::Instant;

use serde::{Deserialize, Serialize};
use vigil_core::{RequestId, SessionId};

/// Lifecycle state of a supervised child process (§4.E state diagram).
///
/// `STARTING -> (USER_TURN <-> ASSISTANT_TURN) -> DEAD`. Any state may
/// transition directly to `DEAD` (process exit, kill, or sweep timeout).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    /// Child process spawned, awaiting its first ready signal.
    Starting,
    /// Waiting on the user; the subprocess is idle between turns.
    UserTurn,
    /// The subprocess is actively working on a turn (including tool use).
    AssistantTurn,
    /// The process has exited or been killed; terminal.
    Dead,
}

impl ProcessState {
    /// Whether this state can still receive input or be killed usefully.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Dead)
    }
}

/// How the wrapper should resolve tool-permission prompts (§4.E).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionMode {
    /// Prompt via the pending-request mechanism for anything not pre-allowed.
    Default,
    /// Auto-accept file edit tools; everything else still prompts.
    AcceptEdits,
    /// Subprocess is restricted to planning; mutating tools are rejected.
    Plan,
    /// Auto-accept every tool call (no prompts).
    BypassPermissions,
}

impl Default for PermissionMode {
    fn default() -> Self {
        Self::Default
    }
}

/// A single normalized permission suggestion surfaced to the client (§4.E step 1).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionSuggestion {
    /// The rule this suggestion would add, e.g. `Bash(npm run test:*)`.
    pub rule: String,
    /// Whether accepting applies for the rest of this session only.
    #[serde(default)]
    pub session_only: bool,
}

/// An immutable snapshot of a pending tool-permission prompt (§3, §4.E).
///
/// Exactly one may be outstanding per process at a time (§3 invariant 4).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingPermissionRequest {
    /// Identifier minted by the wrapper when the prompt was raised.
    pub request_id: RequestId,
    /// Session this request belongs to.
    pub session_id: SessionId,
    /// Name of the tool awaiting permission.
    pub tool_name: String,
    /// The tool call's input, as the subprocess proposed it.
    pub tool_input: serde_json::Value,
    /// Normalized, de-duplicated suggestions the client may choose from.
    pub suggestions: Vec<PermissionSuggestion>,
}

/// The decision a client returns for a pending permission request (§4.F).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum PermissionResponse {
    /// Allow this single call, optionally with a client-edited tool input.
    AllowOnce {
        /// Tool input the client edited before approving, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        updated_input: Option<serde_json::Value>,
    },
    /// Allow and persist one of the offered suggestions.
    AllowAlways {
        /// Index into the original request's `suggestions`.
        suggestion_index: usize,
    },
    /// Reject the call; the subprocess receives a denial result.
    Deny {
        /// Optional human-readable reason surfaced back to the subprocess.
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

/// Supervisor-owned view of one child process (§3 Process Record).
///
/// Held behind the supervisor's registry mutex; the `rss_bytes` field is not
/// cached here but sampled on demand when serializing a `process_state`
/// broadcast (§10.5), since RSS is cheap to query and goes stale instantly.
#[derive(Clone, Debug)]
pub struct ProcessRecord {
    /// Owning session.
    pub session_id: SessionId,
    /// Project the session belongs to.
    pub project_id: vigil_core::ProjectId,
    /// OS process id, once spawned.
    pub pid: Option<u32>,
    /// Current lifecycle state.
    pub state: ProcessState,
    /// When `state` was most recently entered (drives absolute timeouts).
    pub state_entered_at: Instant,
    /// When the process last did anything observable (drives idle timeouts).
    pub last_activity_at: Instant,
    /// Model identifier currently in effect.
    pub model: String,
    /// Active permission mode.
    pub permission_mode: PermissionMode,
    /// At most one outstanding permission prompt (§3 invariant 4).
    pub pending_request: Option<PendingPermissionRequest>,
    /// Set once a kill has been issued, for diagnostics on the terminal broadcast.
    pub kill_reason: Option<String>,
}

impl ProcessRecord {
    /// Construct a freshly-spawned record in `STARTING` (§4.E).
    #[must_use]
    pub fn new(
        session_id: SessionId,
        project_id: vigil_core::ProjectId,
        model: String,
        permission_mode: PermissionMode,
    ) -> Self {
        let now = Instant::now();
        Self {
            session_id,
            project_id,
            pid: None,
            state: ProcessState::Starting,
            state_entered_at: now,
            last_activity_at: now,
            model,
            permission_mode,
            pending_request: None,
            kill_reason: None,
        }
    }

    /// Transition to a new state, resetting both timeout clocks (§4.F).
    pub fn transition(&mut self, next: ProcessState) {
        let now = Instant::now();
        self.state = next;
        self.state_entered_at = now;
        self.last_activity_at = now;
    }

    /// Record activity without changing state (e.g. a streamed tool-use chunk).
    pub fn touch(&mut self) {
        self.last_activity_at = Instant::now();
    }
}

/// A point-in-time, client-facing view of one supervised process (§3, §4.G,
/// §10.5). Unlike [`ProcessRecord`] this is `Serialize` and carries the RSS
/// sample and its human-readable rendering alongside the raw byte count.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessSnapshot {
    pub session_id: SessionId,
    pub project_id: vigil_core::ProjectId,
    pub state: ProcessState,
    pub model: String,
    pub permission_mode: PermissionMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_request: Option<PendingPermissionRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rss_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rss_human: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kill_reason: Option<String>,
}

impl ProcessSnapshot {
    fn format_rss(bytes: u64) -> String {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }

    /// Build a snapshot from a locked [`ProcessRecord`] plus a freshly
    /// sampled RSS reading (§10.5: sampled on demand, never cached).
    #[must_use]
    pub fn from_record(record: &ProcessRecord, rss_bytes: Option<u64>) -> Self {
        Self {
            session_id: record.session_id.clone(),
            project_id: record.project_id.clone(),
            state: record.state,
            model: record.model.clone(),
            permission_mode: record.permission_mode,
            pending_request: record.pending_request.clone(),
            rss_human: rss_bytes.map(Self::format_rss),
            rss_bytes,
            kill_reason: record.kill_reason.clone(),
        }
    }
}

/// Constructs a [`ProcessSnapshot`] from a `process_state` transition event's
/// own fields, for a consumer that doesn't hold a registry reference (§4.G).
#[allow(clippy::too_many_arguments)]
#[must_use]
pub fn process_snapshot_from_transition(
    session_id: SessionId,
    project_id: vigil_core::ProjectId,
    model: String,
    permission_mode: PermissionMode,
    state: ProcessState,
    rss_bytes: Option<u64>,
    kill_reason: Option<String>,
) -> ProcessSnapshot {
    ProcessSnapshot {
        session_id,
        project_id,
        state,
        model,
        permission_mode,
        pending_request: None,
        rss_human: rss_bytes.map(ProcessSnapshot::format_rss),
        rss_bytes,
        kill_reason,
    }
}
