//! Incremental Indexer (§4.C): tails a transcript file by byte offset,
//! classifies and costs each newly-observed line via the Derived-Metadata
//! Engine, and persists the result into the Transcript Store.
//!
//! One indexer owns a given session file at a time (§5); nothing here
//! coordinates across concurrent callers for the same session.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde_json::Value;
use vigil_core::{Cost, ModelRates, ProjectId, SessionId};

use crate::errors::{Result, TranscriptError};
use crate::metadata::{self, CrossReference};
use crate::model::{DisplayLevel, Session, SessionItem};
use crate::store::{DerivedFields, LineRange, TranscriptStore};

/// A model-price schedule lookup (§4.B "Compute cost": "external collaborator").
pub trait RateSchedule: Send + Sync {
    /// Rates for `model`, falling back to a family default when absent or unknown.
    fn rates_for(&self, model: Option<&str>) -> ModelRates;
}

/// A fixed per-model rate table with a family-default fallback.
#[derive(Clone, Debug)]
pub struct StaticRateSchedule {
    default_rates: ModelRates,
    by_model: HashMap<String, ModelRates>,
}

impl StaticRateSchedule {
    #[must_use]
    pub fn new(default_rates: ModelRates) -> Self {
        Self {
            default_rates,
            by_model: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>, rates: ModelRates) -> Self {
        self.by_model.insert(model.into(), rates);
        self
    }
}

impl RateSchedule for StaticRateSchedule {
    fn rates_for(&self, model: Option<&str>) -> ModelRates {
        model
            .and_then(|m| self.by_model.get(m))
            .copied()
            .unwrap_or(self.default_rates)
    }
}

/// One session file's location, parsed from its path relative to the
/// projects root (§6 "Transcript directory layout").
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionPath {
    /// `<root>/<project_dir>/<session_id>.jsonl`.
    Primary { project_dir: String, session_id: String },
    /// `<root>/<project_dir>/<parent_session_id>/subagents/agent-<agent_id>.jsonl`.
    Subagent {
        project_dir: String,
        parent_session_id: String,
        agent_id: String,
    },
}

/// Parse a transcript file path into its logical session location. Returns
/// `None` for anything that doesn't match a recognized shape, including a
/// legacy `<root>/<project_dir>/agent-*` file, which must be ignored (§6).
#[must_use]
pub fn parse_session_path(projects_root: &Path, file_path: &Path) -> Option<SessionPath> {
    let rel = file_path.strip_prefix(projects_root).ok()?;
    let components: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    match components.as_slice() {
        [project_dir, file_name] => {
            let session_id = file_name.strip_suffix(".jsonl")?;
            if session_id.starts_with("agent-") {
                return None;
            }
            Some(SessionPath::Primary {
                project_dir: project_dir.clone(),
                session_id: session_id.to_owned(),
            })
        }
        [project_dir, parent_session_id, subagents, file_name] if subagents == "subagents" => {
            let agent_id = file_name.strip_prefix("agent-")?.strip_suffix(".jsonl")?;
            Some(SessionPath::Subagent {
                project_dir: project_dir.clone(),
                parent_session_id: parent_session_id.clone(),
                agent_id: agent_id.to_owned(),
            })
        }
        _ => None,
    }
}

/// Result of one [`Indexer::sync_file`] call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The path didn't match a recognized transcript location.
    Ignored,
    /// The file's mtime matches the cached value; nothing to do.
    Unchanged,
    /// The file no longer exists; the session (if any) was marked stale.
    Missing,
    /// New lines were parsed and persisted.
    Indexed {
        /// Count of newly-persisted items.
        new_items: u64,
    },
}

const DEFAULT_LOOKBACK_CHUNK: u64 = 64;
const MAX_LOOKBACK: u64 = 8192;

/// Ties the Derived-Metadata Engine to the Transcript Store by sequencing
/// the per-file sync algorithm (§4.C).
pub struct Indexer {
    store: TranscriptStore,
    projects_root: PathBuf,
    rates: Box<dyn RateSchedule>,
    lookback_chunk: u64,
}

impl Indexer {
    #[must_use]
    pub fn new(store: TranscriptStore, projects_root: PathBuf, rates: Box<dyn RateSchedule>) -> Self {
        Self {
            store,
            projects_root,
            rates,
            lookback_chunk: DEFAULT_LOOKBACK_CHUNK,
        }
    }

    /// The projects root this indexer resolves transcript paths against.
    #[must_use]
    pub fn projects_root(&self) -> &Path {
        &self.projects_root
    }

    /// Synchronize one transcript file's newly-appended content (§4.C steps 1-10).
    pub fn sync_file(&self, file_path: &Path) -> Result<SyncOutcome> {
        let Some(parsed) = parse_session_path(&self.projects_root, file_path) else {
            return Ok(SyncOutcome::Ignored);
        };
        let (project_dir, session_id, parent_session_id) = match parsed {
            SessionPath::Primary { project_dir, session_id } => {
                (project_dir, SessionId::from(session_id.as_str()), None)
            }
            SessionPath::Subagent { project_dir, parent_session_id, agent_id } => (
                project_dir,
                SessionId::from(format!("agent-{agent_id}").as_str()),
                Some(SessionId::from(parent_session_id.as_str())),
            ),
        };
        let project_id = ProjectId::from(project_dir.as_str());

        let fs_meta = match std::fs::metadata(file_path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if let Some(mut existing) = self.store.get_session(&session_id)? {
                    existing.stale = true;
                    self.store.save_session(&existing)?;
                }
                return Ok(SyncOutcome::Missing);
            }
            Err(e) => return Err(e.into()),
        };
        let mtime_millis = mtime_millis(&fs_meta)?;

        let existing = self.store.get_session(&session_id)?;
        if let Some(existing) = &existing {
            if existing.mtime_millis == mtime_millis && !existing.stale {
                return Ok(SyncOutcome::Unchanged);
            }
        }

        let byte_offset = existing.as_ref().map_or(0, |s| s.byte_offset);
        let mut file = File::open(file_path)?;
        file.seek(SeekFrom::Start(byte_offset))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;

        let (lines, consumed) = split_complete_lines(&buf);
        if lines.is_empty() {
            return Ok(SyncOutcome::Indexed { new_items: 0 });
        }

        let mut high_water = self.store.max_line_number(&session_id)?;
        let mut seen_message_ids = self.store.existing_message_ids(&session_id)?;

        let mut last_context_usage = None;
        let mut last_model = existing.as_ref().and_then(|s| s.last_model.clone());
        let mut last_cwd = existing.as_ref().and_then(|s| s.last_cwd.clone());
        let mut last_git_branch = existing.as_ref().and_then(|s| s.git_branch.clone());
        let mut repo_root = existing.as_ref().and_then(|s| s.repo_root.clone());
        let mut batch_cost = Cost::zero();
        let mut cross_refs: Vec<(u64, CrossReference)> = Vec::new();
        let mut custom_titles: Vec<(String, String)> = Vec::new();
        let mut items = Vec::with_capacity(lines.len());

        for (line_bytes, line_offset) in &lines {
            high_water += 1;
            let line_number = high_water;
            let raw: Value = serde_json::from_slice(line_bytes).unwrap_or_else(|_| {
                serde_json::json!({ "raw": String::from_utf8_lossy(line_bytes), "parseError": true })
            });
            let record_type = raw.get("type").and_then(Value::as_str).unwrap_or("unknown").to_owned();
            let (kind, display_level) = metadata::classify(&raw);
            let usage = metadata::extract_usage(&raw);
            let model = metadata::extract_model(&raw);
            let cost = usage
                .as_ref()
                .map(|u| metadata::compute_cost(u, &self.rates.rates_for(model.as_deref()), &mut seen_message_ids))
                .unwrap_or_else(Cost::zero);
            if let Some(u) = &usage {
                last_context_usage = Some(metadata::compute_context_usage(u));
            }
            batch_cost = batch_cost.add(cost);
            if model.is_some() {
                last_model = model;
            }

            if let Some(cwd) = metadata::extract_cwd(&raw) {
                if repo_root.is_none() {
                    repo_root = resolve_repo_root(Path::new(&cwd));
                }
                last_cwd = Some(cwd);
            }
            if let Some(branch) = metadata::extract_git_branch(&raw) {
                last_git_branch = Some(branch);
            }
            let timestamp = metadata::extract_timestamp(&raw);

            if let Some(pair) = metadata::extract_custom_title(&raw) {
                custom_titles.push(pair);
            }
            for cross_ref in metadata::extract_cross_references(&raw) {
                cross_refs.push((line_number, cross_ref));
            }

            items.push(SessionItem {
                session_id: session_id.clone(),
                line_number,
                byte_offset: byte_offset + line_offset,
                record_type,
                raw,
                kind,
                display_level,
                usage,
                cost,
                timestamp,
                group_head: None,
                group_tail: None,
                repo_root: repo_root.clone(),
                git_branch: last_git_branch.clone(),
            });
        }

        let new_end_offset = byte_offset + consumed;
        let new_items_count = items.len() as u64;

        self.store.ensure_project(&project_id, &project_dir_path(&self.projects_root, &project_dir))?;
        if existing.is_none() {
            self.store.ensure_session(&Session {
                id: session_id.clone(),
                project_id: project_id.clone(),
                parent_session_id: parent_session_id.clone(),
                byte_offset: 0,
                mtime_millis: 0,
                custom_title: None,
                self_cost: Cost::zero(),
                subagents_cost: Cost::zero(),
                total_cost: Cost::zero(),
                context_usage: 0,
                last_model: None,
                last_cwd: None,
                repo_root: None,
                git_branch: None,
                stale: false,
                compute_complete: false,
                user_message_count: 0,
            })?;
        }

        self.store.append_items(&session_id, &items)?;
        self.write_groups(&session_id, &items)?;

        for (line_number, cross_ref) in cross_refs {
            match cross_ref {
                CrossReference::ToolUse(decl) => {
                    self.store.upsert_tool_result_link(&session_id, line_number, &decl.id, None)?;
                }
                CrossReference::ToolResult { tool_use_id } => {
                    if let Some(tool_use_line) = self.store.find_tool_use_line(&session_id, &tool_use_id)? {
                        self.store
                            .upsert_tool_result_link(&session_id, tool_use_line, &tool_use_id, Some(line_number))?;
                    }
                }
                CrossReference::AgentSpawn { child_session_id, .. } => {
                    self.store
                        .upsert_agent_link(&session_id, line_number, &SessionId::from(child_session_id.as_str()))?;
                }
            }
        }

        for (target_session, title) in custom_titles {
            self.store.set_session_custom_title(&SessionId::from(target_session.as_str()), &title)?;
        }

        if let Some(cwd) = &last_cwd {
            self.store.set_project_resolved_cwd_if_absent(&project_id, cwd)?;
        }
        if let Some(root) = &repo_root {
            self.store.set_project_repo_root(&project_id, root)?;
        }

        let mut session = self.store.get_session(&session_id)?.ok_or_else(|| {
            TranscriptError::InvariantViolation(format!("session {session_id} vanished mid-sync"))
        })?;
        session.byte_offset = new_end_offset;
        session.mtime_millis = mtime_millis;
        session.stale = false;
        session.compute_complete = true;
        session.self_cost = session.self_cost.add(batch_cost);
        session.recompute_total();
        if let Some(usage_sum) = last_context_usage {
            session.context_usage = usage_sum;
        }
        session.last_model = last_model;
        session.last_cwd = last_cwd;
        session.git_branch = last_git_branch;
        session.repo_root = repo_root;
        session.user_message_count = self.store.user_message_count(&session_id)?;
        self.store.save_session(&session)?;

        if let Some(parent) = &session.parent_session_id {
            self.propagate_cost_up(parent)?;
        }

        Ok(SyncOutcome::Indexed { new_items: new_items_count })
    }

    /// Recompute `subagents_cost`/`total_cost` for `start` and every ancestor
    /// above it, so a deeply-nested subagent's cost reaches the top-level
    /// session even when only the leaf's transcript changed (§4.C step 9).
    fn propagate_cost_up(&self, start: &SessionId) -> Result<()> {
        let mut current = start.clone();
        loop {
            self.store.propagate_subagent_cost(&current)?;
            match self.store.get_session(&current)? {
                Some(s) => match s.parent_session_id {
                    Some(parent) => current = parent,
                    None => break,
                },
                None => break,
            }
        }
        Ok(())
    }

    /// Second-pass grouping: recompute `(group_head, group_tail)` for the new
    /// batch plus a backward-walked window of already-persisted items so runs
    /// spanning a batch boundary are bridged correctly (§4.B "Grouping", §9
    /// "walk backward until anchor found").
    fn write_groups(&self, session_id: &SessionId, new_items: &[SessionItem]) -> Result<()> {
        let Some(batch_start) = new_items.first().map(|i| i.line_number) else {
            return Ok(());
        };
        let lookback = self.fetch_lookback_window(session_id, batch_start)?;
        let lookback_len = lookback.len();
        let mut combined = lookback;
        combined.extend(new_items.iter().map(|i| (i.line_number, i.display_level)));

        let groups = metadata::compute_groups(&combined);
        for (line, head, tail) in &groups {
            self.store.set_item_derived(
                session_id,
                *line,
                &DerivedFields { group_head: *head, group_tail: *tail, cost: None },
            )?;
        }
        let _ = lookback_len;
        Ok(())
    }

    fn fetch_lookback_window(&self, session_id: &SessionId, batch_start: u64) -> Result<Vec<(u64, DisplayLevel)>> {
        if batch_start <= 1 {
            return Ok(Vec::new());
        }
        let mut window = self.lookback_chunk;
        loop {
            let start = batch_start.saturating_sub(window).max(1);
            let items = self.store.get_metadata_only(session_id, &[LineRange::HalfOpen(start, batch_start)])?;
            let hit_anchor = items.first().is_some_and(|i| i.display_level == DisplayLevel::DebugOnly);
            if hit_anchor || start == 1 || window >= MAX_LOOKBACK {
                return Ok(items.into_iter().map(|i| (i.line_number, i.display_level)).collect());
            }
            window *= 2;
        }
    }
}

fn project_dir_path(projects_root: &Path, project_dir: &str) -> String {
    projects_root.join(project_dir).to_string_lossy().into_owned()
}

fn mtime_millis(meta: &std::fs::Metadata) -> Result<i64> {
    let modified = meta.modified()?;
    #[allow(clippy::cast_possible_wrap)]
    let millis = modified.duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0);
    Ok(millis)
}

/// Split `buf` into complete (newline-terminated) lines, trimming ASCII
/// whitespace and dropping blanks (§4.C step 3). Any trailing unterminated
/// fragment is left unconsumed so a concurrently-writing subprocess's
/// in-progress line is retried on the next sync. Returns the lines paired
/// with their byte offset relative to the start of `buf`, and the total
/// number of bytes consumed (i.e. up to and including the last newline).
fn split_complete_lines(buf: &[u8]) -> (Vec<(&[u8], u64)>, u64) {
    let mut lines = Vec::new();
    let mut start = 0usize;
    for (i, &b) in buf.iter().enumerate() {
        if b == b'\n' {
            let trimmed = buf[start..i].trim_ascii();
            if !trimmed.is_empty() {
                lines.push((trimmed, start as u64));
            }
            start = i + 1;
        }
    }
    (lines, start as u64)
}

/// Resolve the repository root containing `path` by walking upward for a
/// repository marker (§4.C step 8).
fn resolve_repo_root(path: &Path) -> Option<String> {
    gix::discover(path).ok().and_then(|repo| repo.workdir().map(|p| p.display().to_string()))
}
