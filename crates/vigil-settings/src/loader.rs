//! Settings loading with deep merge and environment variable overrides (§10.3).
//!
//! Loading flow:
//! 1. Start with compiled [`AppConfig::default()`]
//! 2. If `~/.vigil/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `VIGIL_*` environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::config::AppConfig;
use crate::errors::Result;

/// Resolve the path to the settings file (`~/.vigil/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".vigil").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<AppConfig> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<AppConfig> {
    let defaults = serde_json::to_value(AppConfig::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut config: AppConfig = serde_json::from_value(merged)?;
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides to loaded settings (§10.4 bootstrap params).
///
/// Each env var has strict parsing rules: integers must be valid and within
/// the specified range; invalid values are silently ignored (fall back to
/// file/default), logging a warning.
pub fn apply_env_overrides(config: &mut AppConfig) {
    if let Some(v) = read_env_string("VIGIL_PROJECTS_ROOT") {
        config.projects_root = v;
    }
    if let Some(v) = read_env_string("VIGIL_DB_PATH") {
        config.db_path = v;
    }
    if let Some(v) = read_env_string("VIGIL_BIND_HOST") {
        config.bind_host = v;
    }
    if let Some(v) = read_env_u16("VIGIL_BIND_PORT", 1, 65535) {
        config.bind_port = v;
    }
    if let Some(v) = read_env_usize("VIGIL_MAX_SESSIONS", 1, 100_000) {
        config.max_sessions = v;
    }
    if let Some(v) = read_env_u64("VIGIL_SWEEP_INTERVAL_SECS", 1, 3600) {
        config.supervisor.sweep_interval_secs = v;
    }
    if let Some(v) = read_env_u64("VIGIL_TIMEOUT_STARTING_SECS", 1, 3600) {
        config.supervisor.timeout_starting_secs = v;
    }
    if let Some(v) = read_env_u64("VIGIL_TIMEOUT_USER_TURN_SECS", 1, 86_400) {
        config.supervisor.timeout_user_turn_secs = v;
    }
    if let Some(v) = read_env_u64("VIGIL_TIMEOUT_ASSISTANT_TURN_SECS", 1, 86_400) {
        config.supervisor.timeout_assistant_turn_secs = v;
    }
    if let Some(v) = read_env_u64("VIGIL_TIMEOUT_ASSISTANT_TURN_ABSOLUTE_SECS", 1, 172_800) {
        config.supervisor.timeout_assistant_turn_absolute_secs = v;
    }
    if let Some(v) = read_env_u64("VIGIL_SHUTDOWN_GRACE_SECS", 1, 600) {
        config.supervisor.shutdown_grace_secs = v;
    }
    if let Some(v) = read_env_u64("VIGIL_PENDING_TITLE_FLUSH_DELAY_MS", 1, 60_000) {
        config.supervisor.pending_title_flush_delay_ms = v;
    }
    if let Some(v) = read_env_u64("VIGIL_KILL_GRACEFUL_WAIT_SECS", 1, 600) {
        config.supervisor.kill_graceful_wait_secs = v;
    }
    if let Some(v) = read_env_u64("VIGIL_MAX_CLIENT_DROPS", 1, 1_000_000) {
        config.supervisor.max_client_drops = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_u16(name: &str, min: u16, max: u16) -> Option<u16> {
    let val = std::env::var(name).ok()?;
    let result = parse_u16_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

fn read_env_usize(name: &str, min: usize, max: usize) -> Option<usize> {
    let val = std::env::var(name).ok()?;
    let result = parse_usize_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
    }
    result
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SettingsError;

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_simple_override() {
        let target = serde_json::json!({"a": 1, "b": 2});
        let source = serde_json::json!({"a": 10});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 10);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({
            "supervisor": {"sweepIntervalSecs": 30, "shutdownGraceSecs": 5}
        });
        let source = serde_json::json!({
            "supervisor": {"sweepIntervalSecs": 10}
        });
        let merged = deep_merge(target, source);
        assert_eq!(merged["supervisor"]["sweepIntervalSecs"], 10);
        assert_eq!(merged["supervisor"]["shutdownGraceSecs"], 5);
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"items": [1, 2, 3]});
        let source = serde_json::json!({"items": [4, 5]});
        let merged = deep_merge(target, source);
        assert_eq!(merged["items"], serde_json::json!([4, 5]));
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1, "b": 2});
        let source = serde_json::json!({"a": null});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_empty_source() {
        let target = serde_json::json!({"a": 1, "b": {"c": 2}});
        let source = serde_json::json!({});
        let merged = deep_merge(target.clone(), source);
        assert_eq!(merged, target);
    }

    // ── load_settings_from_path ─────────────────────────────────────

    #[test]
    fn load_missing_file_returns_defaults() {
        let path = Path::new("/nonexistent/settings.json");
        let config = load_settings_from_path(path).unwrap();
        let defaults = AppConfig::default();
        assert_eq!(config.bind_port, defaults.bind_port);
        assert_eq!(config.max_sessions, defaults.max_sessions);
    }

    #[test]
    fn load_empty_json_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{}").unwrap();

        let config = load_settings_from_path(&path).unwrap();
        let defaults = AppConfig::default();
        assert_eq!(config.bind_port, defaults.bind_port);
    }

    #[test]
    fn load_partial_json_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"bindPort": 9090, "supervisor": {"maxClientDrops": 250}}"#,
        )
        .unwrap();

        let config = load_settings_from_path(&path).unwrap();
        assert_eq!(config.bind_port, 9090);
        assert_eq!(config.supervisor.max_client_drops, 250);
        assert_eq!(config.supervisor.sweep_interval_secs, 30);
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();

        let result = load_settings_from_path(&path);
        assert!(result.is_err());
        assert!(matches!(result.unwrap_err(), SettingsError::Json(_)));
    }

    // ── parse_u16_range ─────────────────────────────────────────────

    #[test]
    fn parse_u16_valid() {
        assert_eq!(parse_u16_range("9090", 1, 65535), Some(9090));
        assert_eq!(parse_u16_range("1", 1, 65535), Some(1));
    }

    #[test]
    fn parse_u16_out_of_range() {
        assert_eq!(parse_u16_range("0", 1, 65535), None);
    }

    #[test]
    fn parse_u16_invalid() {
        assert_eq!(parse_u16_range("not_a_number", 1, 65535), None);
    }

    // ── parse_u64_range ─────────────────────────────────────────────

    #[test]
    fn parse_u64_valid() {
        assert_eq!(parse_u64_range("900", 1, 86_400), Some(900));
    }

    #[test]
    fn parse_u64_above_max() {
        assert_eq!(parse_u64_range("700000", 1, 86_400), None);
    }

    // ── parse_usize_range ───────────────────────────────────────────

    #[test]
    fn parse_usize_valid() {
        assert_eq!(parse_usize_range("50", 1, 10_000), Some(50));
    }
}
