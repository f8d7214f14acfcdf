//! Configuration types (§6 tunables, §10.3).

use serde::{Deserialize, Serialize};

/// Top-level configuration for a vigil daemon instance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    /// Compiled package version, surfaced for diagnostics.
    pub version: String,
    /// Package name, surfaced for diagnostics.
    pub name: String,
    /// Root directory the filesystem watcher scans for `<project>/<session>.jsonl` trees.
    pub projects_root: String,
    /// Path to the embedded `SQLite` database file.
    pub db_path: String,
    /// Directory holding one `<slug>.md` plan file per planning artifact,
    /// rewritten when a client edits a plan before approving it (§4.E step 5).
    pub plans_dir: String,
    /// Host the broadcast hub's HTTP/WebSocket server binds to.
    pub bind_host: String,
    /// Port the broadcast hub's HTTP/WebSocket server binds to.
    pub bind_port: u16,
    /// Upper bound on concurrently-supervised child processes.
    pub max_sessions: usize,
    /// Process Supervisor tunables (§6 table).
    pub supervisor: SupervisorConfig,
    /// How to spawn the coding-assistant subprocess (§6 "subprocess wire
    /// format is an external collaborator's concern" — this is just the
    /// launch recipe, not the wire protocol itself).
    pub wrapper: WrapperLaunchConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: crate::PACKAGE_VERSION.to_string(),
            name: crate::PACKAGE_NAME.to_string(),
            projects_root: default_projects_root(),
            db_path: default_db_path(),
            plans_dir: default_plans_dir(),
            bind_host: "127.0.0.1".to_string(),
            bind_port: 4317,
            max_sessions: 64,
            supervisor: SupervisorConfig::default(),
            wrapper: WrapperLaunchConfig::default(),
        }
    }
}

/// Launch recipe for the supervised coding-assistant subprocess (§4.F
/// `create_session`/`send_to_session`: "create a wrapper in resume mode").
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WrapperLaunchConfig {
    /// Executable to spawn for every session.
    pub program: String,
    /// Fixed arguments prepended to every invocation.
    pub args: Vec<String>,
    /// Argument appended (followed by the session id) when attaching to an
    /// existing transcript rather than starting fresh.
    pub resume_flag: String,
    /// Model identifier used when a session doesn't pin its own.
    pub default_model: String,
}

impl Default for WrapperLaunchConfig {
    fn default() -> Self {
        Self {
            program: "claude".to_string(),
            args: vec!["--output-format".to_string(), "stream-json".to_string()],
            resume_flag: "--resume".to_string(),
            default_model: "claude-opus-4-6".to_string(),
        }
    }
}

fn home_dir() -> String {
    std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string())
}

fn default_projects_root() -> String {
    format!("{}/.claude/projects", home_dir())
}

fn default_db_path() -> String {
    format!("{}/.vigil/vigil.db", home_dir())
}

fn default_plans_dir() -> String {
    format!("{}/.claude/plans", home_dir())
}

/// Process Supervisor timing/capacity tunables (§6 tunables table).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupervisorConfig {
    /// How often the timeout sweep scans the process registry.
    pub sweep_interval_secs: u64,
    /// Max time a process may remain in `STARTING` before the sweep kills it.
    pub timeout_starting_secs: u64,
    /// Max idle time (since last activity) in `USER_TURN` before the sweep kills it.
    pub timeout_user_turn_secs: u64,
    /// Max idle time (since last activity) in `ASSISTANT_TURN` before the sweep kills it.
    pub timeout_assistant_turn_secs: u64,
    /// Absolute max time in `ASSISTANT_TURN` since state was entered, regardless of activity.
    pub timeout_assistant_turn_absolute_secs: u64,
    /// Bound on the overall shutdown sequence (§5).
    pub shutdown_grace_secs: u64,
    /// Delay after a `USER_TURN`/`DEAD` transition before the pending-title store flushes.
    pub pending_title_flush_delay_ms: u64,
    /// Bounded wait after `SIGTERM` before escalating to `SIGKILL`.
    pub kill_graceful_wait_secs: u64,
    /// Cumulative dropped-message count before the broadcast hub disconnects a client.
    pub max_client_drops: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 30,
            timeout_starting_secs: 60,
            timeout_user_turn_secs: 15 * 60,
            timeout_assistant_turn_secs: 2 * 60 * 60,
            timeout_assistant_turn_absolute_secs: 6 * 60 * 60,
            shutdown_grace_secs: 5,
            pending_title_flush_delay_ms: 500,
            kill_graceful_wait_secs: 2,
            max_client_drops: 100,
        }
    }
}
