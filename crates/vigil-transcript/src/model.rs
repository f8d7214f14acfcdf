//! Transcript data model (§3): projects, sessions, items, and the two kinds
//! of cross-reference links the Derived-Metadata Engine extracts.

use serde::{Deserialize, Serialize};
use vigil_core::{Cost, ProjectId, SessionId, TokenUsage};

/// A project: a directory under the projects root holding one or more
/// session transcript files (§6 directory layout).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    /// Identifier, derived from the directory name.
    pub id: ProjectId,
    /// Absolute filesystem path to the project's transcript storage directory
    /// (`<projects_root>/<project_dir>`), not necessarily where the subprocess runs.
    pub path: String,
    /// The subprocess's actual working directory, promoted from the first
    /// `cwd` ever observed across this project's sessions (§4.C step 7).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_cwd: Option<String>,
    /// Git repository root, if the project directory is inside one (§4.C).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_root: Option<String>,
    /// Whether the watcher has not observed activity here since the last rescan.
    #[serde(default)]
    pub stale: bool,
}

/// A session: one `<session_id>.jsonl` file, or one `subagents/agent-<id>.jsonl`
/// file (§6 directory layout, §3 invariant: subagent parent in same project).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Session identifier, taken from the transcript's own `sessionId` field
    /// or the filename for subagent files.
    pub id: SessionId,
    /// Project this session belongs to.
    pub project_id: ProjectId,
    /// Parent session id, set only for subagent transcripts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_session_id: Option<SessionId>,
    /// Byte offset up to which the file has been indexed (§4.C step 2).
    pub byte_offset: u64,
    /// Mtime (as unix millis) of the file as of the last successful sync.
    pub mtime_millis: i64,
    /// User-settable display title, written via the Pending-Title Store (§4.H).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_title: Option<String>,
    /// Sum of this session's own items' costs (excludes subagents).
    pub self_cost: Cost,
    /// Sum of all descendant subagent sessions' `total_cost` (§3 invariant).
    pub subagents_cost: Cost,
    /// `self_cost + subagents_cost`.
    pub total_cost: Cost,
    /// Sum of the four token categories on the last item that carried a
    /// usage block (§4.C step 7 "last observed context_usage").
    #[serde(default)]
    pub context_usage: u64,
    /// Model identifier from the most recent item that carried one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_model: Option<String>,
    /// Working directory from the most recent item that carried one; the
    /// first-ever value observed is promoted to the owning project's path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_cwd: Option<String>,
    /// Repository root resolved from `last_cwd` on its first observation (§4.C step 8).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_root: Option<String>,
    /// Git branch from the most recent item that carried one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_branch: Option<String>,
    /// Whether the watcher has not observed activity here since the last rescan.
    #[serde(default)]
    pub stale: bool,
    /// Set once the indexer has caught this session up to end-of-file at least once.
    #[serde(default)]
    pub compute_complete: bool,
    /// Count of `ItemKind::UserMessage` items, recomputed from the index on
    /// every sync (§4.C step 7).
    #[serde(default)]
    pub user_message_count: u64,
}

impl Session {
    /// `primary` if this session has no parent, `subagent` otherwise (§3 kind).
    #[must_use]
    pub fn is_subagent(&self) -> bool {
        self.parent_session_id.is_some()
    }

    /// Recompute `total_cost` from `self_cost` and `subagents_cost` (§3 invariant).
    pub fn recompute_total(&mut self) {
        self.total_cost = self.self_cost.add(self.subagents_cost);
    }
}

/// Classification of one session item, determining default client display
/// (§4.B classify).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    /// A user-authored message carrying visible content.
    UserMessage,
    /// A user message whose text starts with a recognized bracketed system prefix.
    SystemNoise,
    /// An assistant-authored message with visible (text/thinking) content.
    AssistantMessage,
    /// An assistant record containing only tool-use blocks.
    ToolUseOnly,
    /// A user record carrying a `tool_result` block.
    ToolResult,
    /// A record explicitly marking itself as a custom session title.
    CustomTitle,
    /// A record reporting a subprocess/API-level error.
    ApiError,
    /// Anything that fails to parse or doesn't match a known shape (§9
    /// dynamic-record-shape guidance).
    Unknown,
}

/// How prominently a client should surface an item by default (§4.B classify).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayLevel {
    /// Always shown.
    Always,
    /// Shown collapsed by default (e.g. large tool results).
    Collapsible,
    /// Hidden unless the client is in a debug/verbose mode.
    DebugOnly,
}

/// One line from a transcript file, plus everything the Derived-Metadata
/// Engine computed about it (§3 Session Item, §4.B).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionItem {
    /// Owning session.
    pub session_id: SessionId,
    /// 0-based line number within the transcript file (§3 invariant: fidelity).
    pub line_number: u64,
    /// Byte offset of the line's start within the transcript file.
    pub byte_offset: u64,
    /// The record's own `type` discriminator string, verbatim.
    pub record_type: String,
    /// Raw parsed JSON for this line, kept verbatim for clients that need it.
    pub raw: serde_json::Value,
    /// Classification (kind + display level).
    pub kind: ItemKind,
    /// Display prominence.
    pub display_level: DisplayLevel,
    /// Token usage extracted from this record's `usage` block, if present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    /// Cost computed for this record (zero if no usage, or a cost-dedup hit).
    pub cost: Cost,
    /// Timestamp extracted from the record, if present, as RFC 3339.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// Line number of the first item in this item's contiguous display group
    /// (§4.B grouping second pass); `None` for `DEBUG_ONLY` items, which break runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_head: Option<u64>,
    /// Line number of the last item in this item's contiguous display group.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_tail: Option<u64>,
    /// Repository root resolved for the session at the time this item was indexed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_root: Option<String>,
    /// Git branch carried by this record, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_branch: Option<String>,
}

/// A result line linked back to the tool-use declaration it answers (§3, §4.B).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResultLink {
    /// Session the link belongs to.
    pub session_id: SessionId,
    /// Tool-use id shared by the declaration and its result.
    pub tool_use_id: String,
    /// Line number of the `tool_use` declaration.
    pub tool_use_line: u64,
    /// Line number of the matching `tool_result`, once seen.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_result_line: Option<u64>,
}

/// A link from a `Task`-style tool use to the subagent session it spawned
/// (§3, §4.B cross-reference extraction).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentLink {
    /// Parent session that issued the spawning tool call.
    pub parent_session_id: SessionId,
    /// Line number of the spawning tool-use declaration.
    pub parent_line: u64,
    /// The subagent session it spawned.
    pub child_session_id: SessionId,
}
