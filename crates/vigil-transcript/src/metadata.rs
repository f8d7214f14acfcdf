//! Derived-Metadata Engine (§4.B): pure functions over a parsed transcript
//! record. Nothing in this module touches storage or the filesystem — the
//! indexer (§4.C) is the only caller, and owns sequencing/persistence.

use std::collections::HashSet;

use serde_json::Value;
use vigil_core::{Cost, ModelRates, TokenUsage};

use crate::model::{DisplayLevel, ItemKind};

/// Bracketed prefixes that mark a user message as system-generated noise
/// rather than something the human actually typed (e.g. hook output wrapped
/// by the CLI before being replayed into the transcript).
const SYSTEM_NOISE_PREFIXES: &[&str] = &["[Request interrupted", "[System", "[Command running"];

/// Tool names whose invocation spawns a subagent session (§4.B cross-reference
/// extraction, "spawn agent" tool).
const AGENT_SPAWN_TOOLS: &[&str] = &["Task", "Agent"];

fn role(raw: &Value) -> Option<&str> {
    raw.get("message").and_then(|m| m.get("role")).and_then(Value::as_str)
}

fn content_blocks(raw: &Value) -> &[Value] {
    raw.get("message")
        .and_then(|m| m.get("content"))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn block_type(block: &Value) -> Option<&str> {
    block.get("type").and_then(Value::as_str)
}

fn has_block_of_type(blocks: &[Value], ty: &str) -> bool {
    blocks.iter().any(|b| block_type(b) == Some(ty))
}

fn first_text(blocks: &[Value]) -> Option<&str> {
    blocks
        .iter()
        .find(|b| block_type(b) == Some("text"))
        .and_then(|b| b.get("text"))
        .and_then(Value::as_str)
}

/// Classify a parsed record into (kind, display_level) (§4.B "Classify").
#[must_use]
pub fn classify(raw: &Value) -> (ItemKind, DisplayLevel) {
    if raw.get("type").and_then(Value::as_str) == Some("custom-title") {
        return (ItemKind::CustomTitle, DisplayLevel::DebugOnly);
    }
    if is_api_error(raw) {
        return (ItemKind::ApiError, DisplayLevel::DebugOnly);
    }

    let blocks = content_blocks(raw);
    match role(raw) {
        Some("user") => {
            if has_block_of_type(blocks, "tool_result") {
                return (ItemKind::ToolResult, DisplayLevel::DebugOnly);
            }
            let visible = blocks
                .iter()
                .any(|b| matches!(block_type(b), Some("text" | "document" | "image")));
            if !visible {
                return (ItemKind::Unknown, DisplayLevel::DebugOnly);
            }
            if let Some(text) = first_text(blocks) {
                if SYSTEM_NOISE_PREFIXES.iter().any(|p| text.starts_with(p)) {
                    return (ItemKind::SystemNoise, DisplayLevel::DebugOnly);
                }
            }
            (ItemKind::UserMessage, DisplayLevel::Always)
        }
        Some("assistant") => {
            let has_visible = blocks.iter().any(|b| matches!(block_type(b), Some("text" | "thinking")));
            if has_visible {
                (ItemKind::AssistantMessage, DisplayLevel::Always)
            } else if has_block_of_type(blocks, "tool_use") {
                (ItemKind::ToolUseOnly, DisplayLevel::Collapsible)
            } else {
                (ItemKind::Unknown, DisplayLevel::DebugOnly)
            }
        }
        _ => (ItemKind::Unknown, DisplayLevel::DebugOnly),
    }
}

fn is_api_error(raw: &Value) -> bool {
    raw.get("type").and_then(Value::as_str) == Some("api_error")
        || raw.get("isApiErrorMessage").and_then(Value::as_bool) == Some(true)
}

/// Extract token usage from a record's `usage` block, if present (§4.B
/// "Extract usage").
#[must_use]
pub fn extract_usage(raw: &Value) -> Option<TokenUsage> {
    let usage = raw.get("message").and_then(|m| m.get("usage"))?;
    let input_tokens = usage.get("input_tokens").and_then(Value::as_u64).unwrap_or(0);
    let output_tokens = usage.get("output_tokens").and_then(Value::as_u64).unwrap_or(0);
    let message_id = raw
        .get("message")
        .and_then(|m| m.get("id"))
        .and_then(Value::as_str)
        .map(str::to_owned);
    Some(TokenUsage {
        message_id,
        input_tokens,
        output_tokens,
        cache_read_tokens: usage.get("cache_read_input_tokens").and_then(Value::as_u64),
        cache_creation_5m_tokens: usage
            .get("cache_creation")
            .and_then(|c| c.get("ephemeral_5m_input_tokens"))
            .and_then(Value::as_u64),
        cache_creation_1h_tokens: usage
            .get("cache_creation")
            .and_then(|c| c.get("ephemeral_1h_input_tokens"))
            .and_then(Value::as_u64),
    })
}

/// Compute cost for one record's usage against a model's price schedule,
/// suppressing cost to zero for a `message_id` already seen in this session
/// (§4.B "Compute cost", §8 law 4).
#[must_use]
pub fn compute_cost(usage: &TokenUsage, rates: &ModelRates, seen_message_ids: &mut HashSet<String>) -> Cost {
    if let Some(id) = &usage.message_id {
        if !seen_message_ids.insert(id.clone()) {
            return Cost::zero();
        }
    }
    rates.price(usage)
}

/// Sum of all four token categories on a single record (§4.B "Compute context usage").
#[must_use]
pub fn compute_context_usage(usage: &TokenUsage) -> u64 {
    usage.context_usage()
}

/// Parse a record's `timestamp` field; absence is acceptable (§4.B
/// "Timestamp extraction").
#[must_use]
pub fn extract_timestamp(raw: &Value) -> Option<String> {
    raw.get("timestamp").and_then(Value::as_str).map(str::to_owned)
}

/// Model identifier for a record, used to select the price schedule and to
/// update a session's `last_model` (§4.B "Compute cost", §4.C step 7).
#[must_use]
pub fn extract_model(raw: &Value) -> Option<String> {
    raw.get("message").and_then(|m| m.get("model")).and_then(Value::as_str).map(str::to_owned)
}

/// Working directory carried by a record, used to update a session's
/// `last_cwd` and to drive first-cwd repo-root resolution (§4.C steps 7-8).
#[must_use]
pub fn extract_cwd(raw: &Value) -> Option<String> {
    raw.get("cwd").and_then(Value::as_str).map(str::to_owned)
}

/// Git branch carried by a record, if any (§3 Session/Session Item fields).
#[must_use]
pub fn extract_git_branch(raw: &Value) -> Option<String> {
    raw.get("gitBranch").and_then(Value::as_str).map(str::to_owned)
}

/// For a `custom-title` record, the (target session id, title) pair it
/// carries (§6 "Title-append format", §4.C step 6).
#[must_use]
pub fn extract_custom_title(raw: &Value) -> Option<(String, String)> {
    if raw.get("type").and_then(Value::as_str) != Some("custom-title") {
        return None;
    }
    let session_id = raw.get("sessionId").and_then(Value::as_str)?.to_owned();
    let title = raw.get("customTitle").and_then(Value::as_str)?.to_owned();
    Some((session_id, title))
}

/// Compute `(group_head, group_tail)` for every item in `items`, a slice of
/// `(line_number, display_level)` ordered by line number, which may include a
/// small lookback window of already-persisted items so runs can be bridged
/// across indexer batches (§4.C ordering constraint, §9 "walk backward until
/// anchor found").
///
/// `DEBUG_ONLY` items break runs and receive `(None, None)`. Every other item
/// in a maximal contiguous run (ignoring `DEBUG_ONLY` gaps) shares the same
/// `(head, tail)`, anchored at the run's first and last line (§4.B "Grouping",
/// §8 law 6).
#[must_use]
pub fn compute_groups(items: &[(u64, DisplayLevel)]) -> Vec<(u64, Option<u64>, Option<u64>)> {
    let mut result = Vec::with_capacity(items.len());
    let mut i = 0;
    while i < items.len() {
        let (line, level) = items[i];
        if level == DisplayLevel::DebugOnly {
            result.push((line, None, None));
            i += 1;
            continue;
        }
        let run_start = i;
        while i < items.len() && items[i].1 != DisplayLevel::DebugOnly {
            i += 1;
        }
        let head = items[run_start].0;
        let tail = items[i - 1].0;
        for item in &items[run_start..i] {
            result.push((item.0, Some(head), Some(tail)));
        }
    }
    result
}

/// A tool-use declaration found inside one record (§4.B cross-reference extraction).
#[derive(Clone, Debug, PartialEq)]
pub struct ToolUseDeclaration {
    pub id: String,
    pub name: String,
    pub input: Value,
}

/// One cross-reference discovered in a record, driving §4.C's second-pass link writes.
#[derive(Clone, Debug, PartialEq)]
pub enum CrossReference {
    /// The record declares a tool use.
    ToolUse(ToolUseDeclaration),
    /// The record carries the result for an earlier tool-use declaration.
    ToolResult { tool_use_id: String },
    /// A tool-use declaration spawned a subagent (its declared agent/session id).
    AgentSpawn { tool_use_id: String, child_session_id: String },
}

/// Extract tool-use declarations, tool-result links, and agent-spawn links
/// from one record (§4.B "Cross-reference extraction").
#[must_use]
pub fn extract_cross_references(raw: &Value) -> Vec<CrossReference> {
    let mut refs = Vec::new();
    let blocks = content_blocks(raw);

    for block in blocks {
        match block_type(block) {
            Some("tool_use") => {
                let Some(id) = block.get("id").and_then(Value::as_str) else { continue };
                let name = block.get("name").and_then(Value::as_str).unwrap_or("").to_owned();
                let input = block.get("input").cloned().unwrap_or(Value::Null);

                if AGENT_SPAWN_TOOLS.contains(&name.as_str()) {
                    if let Some(child) = input.get("sessionId").or_else(|| input.get("agentId")).and_then(Value::as_str)
                    {
                        refs.push(CrossReference::AgentSpawn {
                            tool_use_id: id.to_owned(),
                            child_session_id: child.to_owned(),
                        });
                    }
                }

                refs.push(CrossReference::ToolUse(ToolUseDeclaration { id: id.to_owned(), name, input }));
            }
            Some("tool_result") => {
                if let Some(id) = block.get("tool_use_id").and_then(Value::as_str) {
                    refs.push(CrossReference::ToolResult { tool_use_id: id.to_owned() });
                }
            }
            _ => {}
        }
    }

    refs
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rates() -> ModelRates {
        ModelRates {
            input_per_million: 3.0,
            output_per_million: 15.0,
            cache_read_per_million: 0.3,
            cache_creation_5m_per_million: 3.75,
            cache_creation_1h_per_million: 6.0,
        }
    }

    #[test]
    fn classify_user_text_is_always() {
        let raw = json!({"message": {"role": "user", "content": [{"type": "text", "text": "hi"}]}});
        assert_eq!(classify(&raw), (ItemKind::UserMessage, DisplayLevel::Always));
    }

    #[test]
    fn classify_user_system_noise_prefix_is_debug_only() {
        let raw = json!({"message": {"role": "user", "content": [{"type": "text", "text": "[Request interrupted]"}]}});
        assert_eq!(classify(&raw), (ItemKind::SystemNoise, DisplayLevel::DebugOnly));
    }

    #[test]
    fn classify_assistant_text_is_always() {
        let raw = json!({"message": {"role": "assistant", "content": [{"type": "text", "text": "ok"}]}});
        assert_eq!(classify(&raw), (ItemKind::AssistantMessage, DisplayLevel::Always));
    }

    #[test]
    fn classify_assistant_tool_use_only_is_collapsible() {
        let raw = json!({"message": {"role": "assistant", "content": [{"type": "tool_use", "id": "t1", "name": "Bash", "input": {}}]}});
        assert_eq!(classify(&raw), (ItemKind::ToolUseOnly, DisplayLevel::Collapsible));
    }

    #[test]
    fn classify_tool_result_is_debug_only() {
        let raw = json!({"message": {"role": "user", "content": [{"type": "tool_result", "tool_use_id": "t1"}]}});
        assert_eq!(classify(&raw), (ItemKind::ToolResult, DisplayLevel::DebugOnly));
    }

    #[test]
    fn classify_custom_title() {
        let raw = json!({"type": "custom-title", "customTitle": "x", "sessionId": "s1"});
        assert_eq!(classify(&raw), (ItemKind::CustomTitle, DisplayLevel::DebugOnly));
    }

    #[test]
    fn classify_unparseable_is_unknown_debug_only() {
        let raw = json!({"type": "weird-future-record"});
        assert_eq!(classify(&raw), (ItemKind::Unknown, DisplayLevel::DebugOnly));
    }

    #[test]
    fn extract_usage_reads_all_categories() {
        let raw = json!({"message": {"id": "msg_1", "usage": {
            "input_tokens": 10, "output_tokens": 5,
            "cache_read_input_tokens": 2,
            "cache_creation": {"ephemeral_5m_input_tokens": 1, "ephemeral_1h_input_tokens": 0}
        }}});
        let usage = extract_usage(&raw).unwrap();
        assert_eq!(usage.message_id.as_deref(), Some("msg_1"));
        assert_eq!(usage.input_tokens, 10);
        assert_eq!(usage.cache_read_tokens, Some(2));
    }

    #[test]
    fn extract_usage_absent_returns_none() {
        let raw = json!({"message": {"role": "user"}});
        assert!(extract_usage(&raw).is_none());
    }

    #[test]
    fn compute_cost_dedups_by_message_id() {
        let mut seen = HashSet::new();
        let usage = TokenUsage {
            message_id: Some("msg_1".into()),
            input_tokens: 1_000_000,
            output_tokens: 0,
            cache_read_tokens: None,
            cache_creation_5m_tokens: None,
            cache_creation_1h_tokens: None,
        };
        let first = compute_cost(&usage, &rates(), &mut seen);
        assert!(first.total > 0.0);
        let second = compute_cost(&usage, &rates(), &mut seen);
        assert_eq!(second, Cost::zero());
    }

    #[test]
    fn compute_cost_without_message_id_never_dedups() {
        let mut seen = HashSet::new();
        let usage = TokenUsage {
            message_id: None,
            input_tokens: 1_000_000,
            output_tokens: 0,
            cache_read_tokens: None,
            cache_creation_5m_tokens: None,
            cache_creation_1h_tokens: None,
        };
        let first = compute_cost(&usage, &rates(), &mut seen);
        let second = compute_cost(&usage, &rates(), &mut seen);
        assert_eq!(first, second);
    }

    #[test]
    fn extract_timestamp_present() {
        let raw = json!({"timestamp": "2026-07-27T00:00:00Z"});
        assert_eq!(extract_timestamp(&raw).as_deref(), Some("2026-07-27T00:00:00Z"));
    }

    #[test]
    fn extract_timestamp_absent_is_none() {
        assert_eq!(extract_timestamp(&json!({})), None);
    }

    #[test]
    fn extract_model_reads_message_model() {
        let raw = json!({"message": {"model": "claude-opus-4"}});
        assert_eq!(extract_model(&raw).as_deref(), Some("claude-opus-4"));
    }

    #[test]
    fn extract_cwd_and_branch() {
        let raw = json!({"cwd": "/work/repo", "gitBranch": "main"});
        assert_eq!(extract_cwd(&raw).as_deref(), Some("/work/repo"));
        assert_eq!(extract_git_branch(&raw).as_deref(), Some("main"));
    }

    #[test]
    fn extract_custom_title_matches_format() {
        let raw = json!({"type": "custom-title", "customTitle": "Fix the bug", "sessionId": "s1"});
        assert_eq!(extract_custom_title(&raw), Some(("s1".to_string(), "Fix the bug".to_string())));
    }

    #[test]
    fn extract_custom_title_ignores_other_records() {
        let raw = json!({"message": {"role": "user", "content": []}});
        assert_eq!(extract_custom_title(&raw), None);
    }

    #[test]
    fn cross_references_tool_use_and_agent_spawn() {
        let raw = json!({"message": {"role": "assistant", "content": [
            {"type": "tool_use", "id": "t1", "name": "Task", "input": {"sessionId": "sub-1"}}
        ]}});
        let refs = extract_cross_references(&raw);
        assert!(refs.iter().any(|r| matches!(r, CrossReference::ToolUse(d) if d.id == "t1")));
        assert!(refs.iter().any(|r| matches!(r, CrossReference::AgentSpawn { child_session_id, .. } if child_session_id == "sub-1")));
    }

    #[test]
    fn cross_references_tool_result() {
        let raw = json!({"message": {"role": "user", "content": [
            {"type": "tool_result", "tool_use_id": "t1"}
        ]}});
        let refs = extract_cross_references(&raw);
        assert_eq!(refs, vec![CrossReference::ToolResult { tool_use_id: "t1".into() }]);
    }

    #[test]
    fn cross_references_empty_for_plain_text() {
        let raw = json!({"message": {"role": "user", "content": [{"type": "text", "text": "hi"}]}});
        assert!(extract_cross_references(&raw).is_empty());
    }

    #[test]
    fn compute_groups_debug_only_breaks_run_and_gets_no_bounds() {
        let items = vec![
            (1, DisplayLevel::Always),
            (2, DisplayLevel::DebugOnly),
            (3, DisplayLevel::Always),
        ];
        let groups = compute_groups(&items);
        assert_eq!(groups[0], (1, Some(1), Some(1)));
        assert_eq!(groups[1], (2, None, None));
        assert_eq!(groups[2], (3, Some(3), Some(3)));
    }

    #[test]
    fn compute_groups_run_shares_identical_bounds() {
        let items = vec![
            (1, DisplayLevel::Always),
            (2, DisplayLevel::Collapsible),
            (3, DisplayLevel::Collapsible),
            (4, DisplayLevel::Always),
        ];
        let groups = compute_groups(&items);
        for (_, head, tail) in &groups {
            assert_eq!(*head, Some(1));
            assert_eq!(*tail, Some(4));
        }
    }

    #[test]
    fn compute_groups_single_always_item_is_its_own_group() {
        let items = vec![(1, DisplayLevel::Always)];
        assert_eq!(compute_groups(&items), vec![(1, Some(1), Some(1))]);
    }
}
