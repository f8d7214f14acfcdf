//! Transcript Store (§4.A): append-only row log over the embedded `SQLite`
//! database, plus the session/project aggregate read-modify-writes the
//! Incremental Indexer (§4.C) needs on top of it.
//!
//! Append and read-by-range only: nothing here ever seeks a transcript file
//! or talks to the OS. One writer per session is a caller-side guarantee
//! (§5) — the store itself only guarantees atomic batch visibility.

use rusqlite::{params, OptionalExtension};
use vigil_core::{Cost, ProjectId, SessionId};

use crate::db::ConnectionPool;
use crate::errors::{Result, TranscriptError};
use crate::model::{AgentLink, DisplayLevel, ItemKind, Project, Session, SessionItem, ToolResultLink};

/// A range of line numbers, used by [`TranscriptStore::get_items`] /
/// [`TranscriptStore::get_metadata_only`] (§4.A: "union of {exact, half-open,
/// closed} intervals").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineRange {
    /// A single line number.
    Exact(u64),
    /// `[start, end)`.
    HalfOpen(u64, u64),
    /// `[start, end]`.
    Closed(u64, u64),
}

impl LineRange {
    fn bounds(self) -> (u64, u64) {
        match self {
            Self::Exact(n) => (n, n),
            Self::HalfOpen(start, end) => (start, end.saturating_sub(1)),
            Self::Closed(start, end) => (start, end),
        }
    }
}

/// Fields written by the Derived-Metadata Engine's second pass
/// (§3: "Immutable after write with the exception of a second-pass update").
#[derive(Clone, Debug, Default)]
pub struct DerivedFields {
    pub group_head: Option<u64>,
    pub group_tail: Option<u64>,
    pub cost: Option<Cost>,
}

fn item_kind_str(kind: ItemKind) -> &'static str {
    match kind {
        ItemKind::UserMessage => "user_message",
        ItemKind::SystemNoise => "system_noise",
        ItemKind::AssistantMessage => "assistant_message",
        ItemKind::ToolUseOnly => "tool_use_only",
        ItemKind::ToolResult => "tool_result",
        ItemKind::CustomTitle => "custom_title",
        ItemKind::ApiError => "api_error",
        ItemKind::Unknown => "unknown",
    }
}

fn parse_item_kind(s: &str) -> ItemKind {
    match s {
        "user_message" => ItemKind::UserMessage,
        "system_noise" => ItemKind::SystemNoise,
        "assistant_message" => ItemKind::AssistantMessage,
        "tool_use_only" => ItemKind::ToolUseOnly,
        "tool_result" => ItemKind::ToolResult,
        "custom_title" => ItemKind::CustomTitle,
        "api_error" => ItemKind::ApiError,
        _ => ItemKind::Unknown,
    }
}

fn display_level_str(level: DisplayLevel) -> &'static str {
    match level {
        DisplayLevel::Always => "always",
        DisplayLevel::Collapsible => "collapsible",
        DisplayLevel::DebugOnly => "debug_only",
    }
}

fn parse_display_level(s: &str) -> DisplayLevel {
    match s {
        "always" => DisplayLevel::Always,
        "collapsible" => DisplayLevel::Collapsible,
        _ => DisplayLevel::DebugOnly,
    }
}

/// Thin wrapper over the connection pool implementing §4.A's operations.
pub struct TranscriptStore {
    pool: ConnectionPool,
}

impl TranscriptStore {
    #[must_use]
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    // -- Projects --------------------------------------------------------

    /// Insert a project if it doesn't exist yet; no-op otherwise.
    pub fn ensure_project(&self, project_id: &ProjectId, path: &str) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO projects (id, path, repo_root, stale) VALUES (?1, ?2, NULL, 0)
             ON CONFLICT(id) DO NOTHING",
            params![project_id.as_str(), path],
        )?;
        Ok(())
    }

    pub fn set_project_repo_root(&self, project_id: &ProjectId, repo_root: &str) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "UPDATE projects SET repo_root = ?2 WHERE id = ?1",
            params![project_id.as_str(), repo_root],
        )?;
        Ok(())
    }

    /// Promote the first-ever observed `cwd` to the project's resolved working
    /// directory, if one isn't already recorded (§4.C step 7).
    pub fn set_project_resolved_cwd_if_absent(&self, project_id: &ProjectId, cwd: &str) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "UPDATE projects SET resolved_cwd = ?2 WHERE id = ?1 AND resolved_cwd IS NULL",
            params![project_id.as_str(), cwd],
        )?;
        Ok(())
    }

    pub fn set_project_stale(&self, project_id: &ProjectId, stale: bool) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "UPDATE projects SET stale = ?2 WHERE id = ?1",
            params![project_id.as_str(), stale],
        )?;
        Ok(())
    }

    pub fn get_project(&self, project_id: &ProjectId) -> Result<Option<Project>> {
        let conn = self.pool.get()?;
        conn.query_row(
            "SELECT id, path, resolved_cwd, repo_root, stale FROM projects WHERE id = ?1",
            params![project_id.as_str()],
            |row| {
                Ok(Project {
                    id: ProjectId::from_string(row.get(0)?),
                    path: row.get(1)?,
                    resolved_cwd: row.get(2)?,
                    repo_root: row.get(3)?,
                    stale: row.get(4)?,
                })
            },
        )
        .optional()
        .map_err(TranscriptError::from)
    }

    /// Delete a project row, used once all its sessions are gone (§3).
    pub fn delete_project(&self, project_id: &ProjectId) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute("DELETE FROM projects WHERE id = ?1", params![project_id.as_str()])?;
        Ok(())
    }

    pub fn session_count_for_project(&self, project_id: &ProjectId) -> Result<u64> {
        let conn = self.pool.get()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sessions WHERE project_id = ?1",
            params![project_id.as_str()],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    // -- Sessions ----------------------------------------------------------

    /// Insert a session row if absent; no-op if it already exists (§4.C
    /// "Created when the first non-empty transcript content is observed").
    pub fn ensure_session(&self, session: &Session) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO sessions (id, project_id, parent_session_id, byte_offset, mtime_millis, stale)
             VALUES (?1, ?2, ?3, ?4, ?5, 0)
             ON CONFLICT(id) DO NOTHING",
            params![
                session.id.as_str(),
                session.project_id.as_str(),
                session.parent_session_id.as_ref().map(vigil_core::SessionId::as_str),
                session.byte_offset,
                session.mtime_millis,
            ],
        )?;
        Ok(())
    }

    pub fn get_session(&self, session_id: &SessionId) -> Result<Option<Session>> {
        let conn = self.pool.get()?;
        conn.query_row(
            "SELECT id, project_id, parent_session_id, byte_offset, mtime_millis, custom_title,
                    self_input_cost, self_output_cost, self_cost,
                    subagents_input_cost, subagents_output_cost, subagents_cost,
                    total_input_cost, total_output_cost, total_cost,
                    context_usage, last_model, last_cwd, repo_root, git_branch,
                    stale, compute_complete, user_message_count
             FROM sessions WHERE id = ?1",
            params![session_id.as_str()],
            Self::row_to_session,
        )
        .optional()
        .map_err(TranscriptError::from)
    }

    fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<Session> {
        Ok(Session {
            id: SessionId::from_string(row.get(0)?),
            project_id: ProjectId::from_string(row.get(1)?),
            parent_session_id: row.get::<_, Option<String>>(2)?.map(SessionId::from_string),
            byte_offset: row.get(3)?,
            mtime_millis: row.get(4)?,
            custom_title: row.get(5)?,
            self_cost: Cost { input_cost: row.get(6)?, output_cost: row.get(7)?, total: row.get(8)? },
            subagents_cost: Cost { input_cost: row.get(9)?, output_cost: row.get(10)?, total: row.get(11)? },
            total_cost: Cost { input_cost: row.get(12)?, output_cost: row.get(13)?, total: row.get(14)? },
            context_usage: row.get(15)?,
            last_model: row.get(16)?,
            last_cwd: row.get(17)?,
            repo_root: row.get(18)?,
            git_branch: row.get(19)?,
            stale: row.get(20)?,
            compute_complete: row.get(21)?,
            user_message_count: row.get(22)?,
        })
    }

    /// Update the cursor, aggregates, and custom title for a session (§4.C
    /// step 7/10). Callers pass the full, already-recomputed state.
    pub fn save_session(&self, session: &Session) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "UPDATE sessions SET
                byte_offset = ?2, mtime_millis = ?3, custom_title = ?4,
                self_input_cost = ?5, self_output_cost = ?6, self_cost = ?7,
                subagents_input_cost = ?8, subagents_output_cost = ?9, subagents_cost = ?10,
                total_input_cost = ?11, total_output_cost = ?12, total_cost = ?13,
                context_usage = ?14, last_model = ?15, last_cwd = ?16,
                repo_root = ?17, git_branch = ?18, stale = ?19, compute_complete = ?20,
                user_message_count = ?21
             WHERE id = ?1",
            params![
                session.id.as_str(),
                session.byte_offset,
                session.mtime_millis,
                session.custom_title,
                session.self_cost.input_cost,
                session.self_cost.output_cost,
                session.self_cost.total,
                session.subagents_cost.input_cost,
                session.subagents_cost.output_cost,
                session.subagents_cost.total,
                session.total_cost.input_cost,
                session.total_cost.output_cost,
                session.total_cost.total,
                session.context_usage,
                session.last_model,
                session.last_cwd,
                session.repo_root,
                session.git_branch,
                session.stale,
                session.compute_complete,
                session.user_message_count,
            ],
        )?;
        Ok(())
    }

    pub fn set_session_stale(&self, session_id: &SessionId, stale: bool) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute("UPDATE sessions SET stale = ?2 WHERE id = ?1", params![session_id.as_str(), stale])?;
        Ok(())
    }

    /// Apply a custom-title record's effect on its target session (§4.B classify,
    /// §4.C step 6).
    pub fn set_session_custom_title(&self, session_id: &SessionId, title: &str) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "UPDATE sessions SET custom_title = ?2 WHERE id = ?1",
            params![session_id.as_str(), title],
        )?;
        Ok(())
    }

    /// Every distinct non-null `message_id` already persisted for this session,
    /// used to seed cost-dedup across indexer batches (§8 law 4).
    pub fn existing_message_ids(&self, session_id: &SessionId) -> Result<std::collections::HashSet<String>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT message_id FROM session_items WHERE session_id = ?1 AND message_id IS NOT NULL",
        )?;
        let ids = stmt
            .query_map(params![session_id.as_str()], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids.into_iter().collect())
    }

    pub fn child_session_ids(&self, parent_session_id: &SessionId) -> Result<Vec<SessionId>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare("SELECT id FROM sessions WHERE parent_session_id = ?1")?;
        let ids = stmt
            .query_map(params![parent_session_id.as_str()], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids.into_iter().map(SessionId::from_string).collect())
    }

    /// Recompute `subagents_cost` and `total_cost` for `parent` from its
    /// children's current `total_cost`, in one statement (§4.C step 9, §9
    /// "Parent-cost atomicity"). Safe to call concurrently from sibling
    /// indexer cycles: the `UPDATE ... (SELECT ...)` subquery re-reads the
    /// children's current rows atomically under `SQLite`'s transaction.
    pub fn propagate_subagent_cost(&self, parent: &SessionId) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "UPDATE sessions SET
                subagents_input_cost = (SELECT COALESCE(SUM(total_input_cost), 0) FROM sessions WHERE parent_session_id = ?1),
                subagents_output_cost = (SELECT COALESCE(SUM(total_output_cost), 0) FROM sessions WHERE parent_session_id = ?1),
                subagents_cost = (SELECT COALESCE(SUM(total_cost), 0) FROM sessions WHERE parent_session_id = ?1)
             WHERE id = ?1",
            params![parent.as_str()],
        )?;
        conn.execute(
            "UPDATE sessions SET
                total_input_cost = self_input_cost + subagents_input_cost,
                total_output_cost = self_output_cost + subagents_output_cost,
                total_cost = self_cost + subagents_cost
             WHERE id = ?1",
            params![parent.as_str()],
        )?;
        Ok(())
    }

    // -- Session items (§4.A) ----------------------------------------------

    /// Atomic bulk insert; duplicates on (session, line) are silently ignored
    /// (§4.A "idempotent replay", §8 law 1).
    pub fn append_items(&self, session_id: &SessionId, items: &[SessionItem]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO session_items (
                    session_id, line_number, byte_offset, record_type, raw, kind, display_level,
                    message_id, usage_input_tokens, usage_output_tokens,
                    usage_cache_read_tokens, usage_cache_creation_5m_tokens, usage_cache_creation_1h_tokens,
                    input_cost, output_cost, cost, timestamp, group_head, group_tail,
                    repo_root, git_branch
                 ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21)
                 ON CONFLICT(session_id, line_number) DO NOTHING",
            )?;
            for item in items {
                stmt.execute(params![
                    session_id.as_str(),
                    item.line_number,
                    item.byte_offset,
                    item.record_type,
                    serde_json::to_string(&item.raw)?,
                    item_kind_str(item.kind),
                    display_level_str(item.display_level),
                    item.usage.as_ref().and_then(|u| u.message_id.clone()),
                    item.usage.as_ref().map(|u| u.input_tokens),
                    item.usage.as_ref().map(|u| u.output_tokens),
                    item.usage.as_ref().and_then(|u| u.cache_read_tokens),
                    item.usage.as_ref().and_then(|u| u.cache_creation_5m_tokens),
                    item.usage.as_ref().and_then(|u| u.cache_creation_1h_tokens),
                    item.cost.input_cost,
                    item.cost.output_cost,
                    item.cost.total,
                    item.timestamp,
                    item.group_head,
                    item.group_tail,
                    item.repo_root,
                    item.git_branch,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Second-pass update of an existing item's group bounds/cost (§4.A
    /// `set_item_derived`).
    pub fn set_item_derived(&self, session_id: &SessionId, line: u64, fields: &DerivedFields) -> Result<()> {
        let conn = self.pool.get()?;
        if let Some(cost) = &fields.cost {
            conn.execute(
                "UPDATE session_items SET group_head = ?3, group_tail = ?4,
                    input_cost = ?5, output_cost = ?6, cost = ?7
                 WHERE session_id = ?1 AND line_number = ?2",
                params![
                    session_id.as_str(),
                    line,
                    fields.group_head,
                    fields.group_tail,
                    cost.input_cost,
                    cost.output_cost,
                    cost.total,
                ],
            )?;
        } else {
            conn.execute(
                "UPDATE session_items SET group_head = ?3, group_tail = ?4
                 WHERE session_id = ?1 AND line_number = ?2",
                params![session_id.as_str(), line, fields.group_head, fields.group_tail],
            )?;
        }
        Ok(())
    }

    /// Ordered fetch by line across a union of ranges (§4.A `get_items`).
    pub fn get_items(&self, session_id: &SessionId, ranges: &[LineRange]) -> Result<Vec<SessionItem>> {
        self.get_items_impl(session_id, ranges, true)
    }

    /// Same as [`Self::get_items`] but omits verbatim record bytes (§4.A
    /// `get_metadata_only`).
    pub fn get_metadata_only(&self, session_id: &SessionId, ranges: &[LineRange]) -> Result<Vec<SessionItem>> {
        self.get_items_impl(session_id, ranges, false)
    }

    fn get_items_impl(&self, session_id: &SessionId, ranges: &[LineRange], with_raw: bool) -> Result<Vec<SessionItem>> {
        if ranges.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.pool.get()?;
        let clause = ranges.iter().map(|_| "(line_number BETWEEN ? AND ?)").collect::<Vec<_>>().join(" OR ");
        let sql = format!(
            "SELECT line_number, byte_offset, record_type, raw, kind, display_level,
                    usage_input_tokens, usage_output_tokens, usage_cache_read_tokens,
                    usage_cache_creation_5m_tokens, usage_cache_creation_1h_tokens, message_id,
                    input_cost, output_cost, cost, timestamp, group_head, group_tail,
                    repo_root, git_branch
             FROM session_items WHERE session_id = ? AND ({clause}) ORDER BY line_number"
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut bound: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(session_id.as_str().to_owned())];
        for range in ranges {
            let (start, end) = range.bounds();
            bound.push(Box::new(start));
            bound.push(Box::new(end));
        }
        let param_refs: Vec<&dyn rusqlite::ToSql> = bound.iter().map(AsRef::as_ref).collect();
        let rows = stmt.query_map(param_refs.as_slice(), |row| {
            let raw_text: String = row.get(3)?;
            let raw = if with_raw {
                serde_json::from_str(&raw_text).unwrap_or(serde_json::Value::Null)
            } else {
                serde_json::Value::Null
            };
            let kind: String = row.get(4)?;
            let display_level: String = row.get(5)?;
            let input_tokens: Option<u64> = row.get(6)?;
            let usage = input_tokens.map(|input_tokens| vigil_core::TokenUsage {
                message_id: row.get::<_, Option<String>>(11).unwrap_or(None),
                input_tokens,
                output_tokens: row.get(7).unwrap_or(0),
                cache_read_tokens: row.get(8).unwrap_or(None),
                cache_creation_5m_tokens: row.get(9).unwrap_or(None),
                cache_creation_1h_tokens: row.get(10).unwrap_or(None),
            });
            Ok(SessionItem {
                session_id: session_id.clone(),
                line_number: row.get(0)?,
                byte_offset: row.get(1)?,
                record_type: row.get(2)?,
                raw,
                kind: parse_item_kind(&kind),
                display_level: parse_display_level(&display_level),
                usage,
                cost: Cost { input_cost: row.get(12)?, output_cost: row.get(13)?, total: row.get(14)? },
                timestamp: row.get(15)?,
                group_head: row.get(16)?,
                group_tail: row.get(17)?,
                repo_root: row.get(18)?,
                git_branch: row.get(19)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(TranscriptError::from)
    }

    pub fn max_line_number(&self, session_id: &SessionId) -> Result<u64> {
        let conn = self.pool.get()?;
        let max: Option<i64> = conn.query_row(
            "SELECT MAX(line_number) FROM session_items WHERE session_id = ?1",
            params![session_id.as_str()],
            |row| row.get(0),
        )?;
        Ok(max.unwrap_or(0).max(0) as u64)
    }

    /// Idempotent tool-result link insertion (§4.A `upsert_link`, kind=tool-result).
    pub fn upsert_tool_result_link(&self, session_id: &SessionId, tool_use_line: u64, tool_use_id: &str, tool_result_line: Option<u64>) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO tool_result_links (session_id, tool_use_id, tool_use_line, tool_result_line)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(session_id, tool_use_id, tool_use_line)
             DO UPDATE SET tool_result_line = excluded.tool_result_line",
            params![session_id.as_str(), tool_use_id, tool_use_line, tool_result_line],
        )?;
        Ok(())
    }

    /// Record an agent link from a parent tool-use declaration to the child
    /// session it spawned (§3 Agent Link).
    pub fn upsert_agent_link(&self, parent_session_id: &SessionId, parent_line: u64, child_session_id: &SessionId) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO agent_links (parent_session_id, parent_line, child_session_id)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(parent_session_id, parent_line) DO UPDATE SET child_session_id = excluded.child_session_id",
            params![parent_session_id.as_str(), parent_line, child_session_id.as_str()],
        )?;
        Ok(())
    }

    pub fn find_tool_use_line(&self, session_id: &SessionId, tool_use_id: &str) -> Result<Option<u64>> {
        let conn = self.pool.get()?;
        conn.query_row(
            "SELECT tool_use_line FROM tool_result_links WHERE session_id = ?1 AND tool_use_id = ?2",
            params![session_id.as_str(), tool_use_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(TranscriptError::from)
    }

    pub fn get_agent_links(&self, parent_session_id: &SessionId) -> Result<Vec<AgentLink>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT parent_line, child_session_id FROM agent_links WHERE parent_session_id = ?1 ORDER BY parent_line",
        )?;
        let rows = stmt.query_map(params![parent_session_id.as_str()], |row| {
            Ok(AgentLink {
                parent_session_id: parent_session_id.clone(),
                parent_line: row.get(0)?,
                child_session_id: SessionId::from_string(row.get(1)?),
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(TranscriptError::from)
    }

    pub fn get_tool_result_links(&self, session_id: &SessionId) -> Result<Vec<ToolResultLink>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT tool_use_id, tool_use_line, tool_result_line FROM tool_result_links WHERE session_id = ?1",
        )?;
        let rows = stmt.query_map(params![session_id.as_str()], |row| {
            Ok(ToolResultLink {
                session_id: session_id.clone(),
                tool_use_id: row.get(0)?,
                tool_use_line: row.get(1)?,
                tool_result_line: row.get(2)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(TranscriptError::from)
    }

    pub fn user_message_count(&self, session_id: &SessionId) -> Result<u64> {
        let conn = self.pool.get()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM session_items WHERE session_id = ?1 AND kind = 'user_message'",
            params![session_id.as_str()],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    /// Walk a session's items newest-first and return the first `slug` field
    /// found in the raw record, if any (plan-rewrite lookup, §4.E step 5).
    pub fn last_session_slug(&self, session_id: &SessionId) -> Result<Option<String>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT raw FROM session_items WHERE session_id = ?1 ORDER BY line_number DESC",
        )?;
        let mut rows = stmt.query(params![session_id.as_str()])?;
        while let Some(row) = rows.next()? {
            let raw_text: String = row.get(0)?;
            let Ok(value) = serde_json::from_str::<serde_json::Value>(&raw_text) else {
                continue;
            };
            if let Some(slug) = value.get("slug").and_then(serde_json::Value::as_str) {
                if !slug.is_empty() {
                    return Ok(Some(slug.to_string()));
                }
            }
        }
        Ok(None)
    }
}
