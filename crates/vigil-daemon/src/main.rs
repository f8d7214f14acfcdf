//! `vigil-daemon` — process entry point.
//!
//! Wires the Process Supervisor, Transcript Watcher/Incremental Indexer, and
//! Broadcast Hub into one running server (§9 startup sequence):
//!
//! 1. Load settings, apply CLI overrides.
//! 2. Open the embedded database and build the Transcript Store + Indexer.
//! 3. Start the Filesystem Watcher over the projects root.
//! 4. Start the Process Supervisor and its timeout sweep.
//! 5. Run an initial scan of the projects root so the store is populated
//!    before the watcher's live events start arriving.
//! 6. Start the Broadcast Hub (HTTP/WebSocket server) and the event bridge
//!    that connects the supervisor and watcher to it.
//! 7. Wait for a shutdown signal, then tear everything down in reverse order
//!    (§5 cancellation sequence).

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{info, warn};

use vigil_core::{ModelRates, ProjectId, SessionId};
use vigil_logging::LogFormat;
use vigil_runtime::{ProcessState, Supervisor, SupervisorEvent};
use vigil_server::config::ServerConfig;
use vigil_server::server::VigilServer;
use vigil_server::startup::StartupProgress;
use vigil_server::websocket::command::CommandContext;
use vigil_server::websocket::event_bridge::EventBridge;
use vigil_settings::{load_settings, AppConfig};
use vigil_transcript::db::{open_file, ConnectionConfig};
use vigil_transcript::{Indexer, PendingTitleStore, StaticRateSchedule, TranscriptStore};
use vigil_watch::{Watcher, WatcherConfig};

/// Command-line overrides layered on top of the loaded [`AppConfig`] (§10.4).
#[derive(Parser, Debug)]
#[command(name = "vigil-daemon", about = "Local control plane for supervised coding-assistant sessions")]
struct Cli {
    /// Override the projects root the watcher scans.
    #[arg(long)]
    projects_root: Option<PathBuf>,
    /// Override the embedded SQLite database path.
    #[arg(long)]
    db_path: Option<PathBuf>,
    /// Override the directory plan files are rewritten into.
    #[arg(long)]
    plans_dir: Option<PathBuf>,
    /// Override the bind host for the HTTP/WebSocket server.
    #[arg(long)]
    host: Option<String>,
    /// Override the bind port for the HTTP/WebSocket server.
    #[arg(long)]
    port: Option<u16>,
    /// Override the maximum number of concurrently-supervised sessions.
    #[arg(long)]
    max_sessions: Option<usize>,
}

impl Cli {
    fn apply(self, config: &mut AppConfig) {
        if let Some(v) = self.projects_root {
            config.projects_root = v.to_string_lossy().into_owned();
        }
        if let Some(v) = self.db_path {
            config.db_path = v.to_string_lossy().into_owned();
        }
        if let Some(v) = self.plans_dir {
            config.plans_dir = v.to_string_lossy().into_owned();
        }
        if let Some(v) = self.host {
            config.bind_host = v;
        }
        if let Some(v) = self.port {
            config.bind_port = v;
        }
        if let Some(v) = self.max_sessions {
            config.max_sessions = v;
        }
    }
}

/// Default cost schedule used when no per-model override is configured.
/// Pricing is an external collaborator's concern (§4.B); this is a
/// reasonable placeholder rather than a maintained table.
fn default_rates() -> ModelRates {
    ModelRates {
        input_per_million: 3.0,
        output_per_million: 15.0,
        cache_read_per_million: 0.3,
        cache_creation_5m_per_million: 3.75,
        cache_creation_1h_per_million: 6.0,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = load_settings().unwrap_or_else(|err| {
        eprintln!("failed to load settings, falling back to defaults: {err}");
        AppConfig::default()
    });
    cli.apply(&mut config);

    vigil_logging::init("info", LogFormat::Compact, None);
    info!(version = %config.version, bind = %format!("{}:{}", config.bind_host, config.bind_port), "starting vigil-daemon");

    let projects_root = PathBuf::from(&config.projects_root);
    std::fs::create_dir_all(&projects_root)
        .with_context(|| format!("failed to create projects root: {}", projects_root.display()))?;

    let pool = open_file(&config.db_path, &ConnectionConfig::default())
        .with_context(|| format!("failed to open database at {}", config.db_path))?;
    let store = Arc::new(TranscriptStore::new(pool.clone()));
    let pending_titles = Arc::new(PendingTitleStore::new());
    let indexer = Arc::new(Indexer::new(TranscriptStore::new(pool), projects_root.clone(), Box::new(StaticRateSchedule::new(default_rates()))));

    let (watcher, watch_rx) = Watcher::start(projects_root.clone(), &WatcherConfig::default()).context("failed to start filesystem watcher")?;

    let (supervisor_tx, supervisor_rx) = mpsc::channel::<SupervisorEvent>(256);
    let supervisor = Supervisor::new(config.supervisor, supervisor_tx, Arc::clone(&store), config.plans_dir.clone());
    let sweep_handle = supervisor.spawn_sweep();

    let ctx = Arc::new(CommandContext {
        supervisor: Arc::clone(&supervisor),
        store: Arc::clone(&store),
        pending_titles: Arc::clone(&pending_titles),
        wrapper: config.wrapper.clone(),
    });

    let startup = Arc::new(StartupProgress::new());
    let metrics_handle = vigil_server::metrics::install_recorder();

    let server_config = ServerConfig { host: config.bind_host.clone(), port: config.bind_port, ..ServerConfig::default() };
    let server = Arc::new(VigilServer::new(server_config, ctx, config.supervisor.max_client_drops, Arc::clone(&startup), metrics_handle));

    // `supervisor_rx` has exactly one consumer. The pending-title flush needs
    // to observe every `ProcessState` transition before the broadcast bridge
    // sees it, so it sits in front and forwards everything downstream
    // untouched (§4.H).
    let (bridge_tx, bridge_rx) = mpsc::channel::<SupervisorEvent>(256);
    let flush_handle = tokio::spawn(pending_title_flush_loop(
        supervisor_rx,
        bridge_tx,
        Arc::clone(&pending_titles),
        projects_root.clone(),
        config.supervisor.pending_title_flush_delay_ms,
    ));

    let event_bridge = EventBridge::new(
        bridge_rx,
        watch_rx,
        Arc::clone(&supervisor),
        Arc::clone(&store),
        Arc::clone(&indexer),
        Arc::clone(server.broadcast()),
        server.shutdown().token(),
    );
    let bridge_handle = tokio::spawn(event_bridge.run());

    run_initial_scan(&indexer, &projects_root, &startup);

    let (addr, listen_handle) = server.listen().await.context("failed to bind HTTP/WebSocket server")?;
    info!(%addr, "vigil-daemon ready");

    tokio::signal::ctrl_c().await.context("failed to listen for shutdown signal")?;
    info!("shutdown signal received");

    server.shutdown().shutdown();
    supervisor.shutdown().await;
    watcher.shutdown();

    let grace = Duration::from_secs(config.supervisor.shutdown_grace_secs);
    let _ = tokio::time::timeout(grace, listen_handle).await;
    flush_handle.abort();
    bridge_handle.abort();
    sweep_handle.abort();

    info!("vigil-daemon shut down");
    Ok(())
}

/// Walk the projects root once at startup so the store reflects every
/// existing transcript before the watcher's live events start arriving,
/// reporting progress through `startup` as each file is synced (§4.D, §9).
fn run_initial_scan(indexer: &Indexer, projects_root: &Path, startup: &StartupProgress) {
    startup.set("scanning", None);
    let files: Vec<PathBuf> = walkdir::WalkDir::new(projects_root)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "jsonl"))
        .map(|e| e.path().to_path_buf())
        .collect();

    let total = files.len();
    startup.set("indexing", Some(format!("0/{total} sessions")));
    for (i, file) in files.iter().enumerate() {
        if let Err(err) = indexer.sync_file(file) {
            warn!(path = %file.display(), %err, "failed to index transcript during initial scan");
        }
        startup.set("indexing", Some(format!("{}/{total} sessions", i + 1)));
    }
    startup.set("ready", None);
}

/// Watches every `ProcessState` transition for a `UserTurn`/`Dead` entry with
/// a pending title, flushing it to the session's transcript file after a
/// short delay so the write never races the subprocess's own stdout (§4.H).
/// Every event is forwarded to `forward` untouched once handled here, since
/// the broadcast bridge still needs to see it.
async fn pending_title_flush_loop(
    mut supervisor_rx: mpsc::Receiver<SupervisorEvent>,
    forward: mpsc::Sender<SupervisorEvent>,
    pending_titles: Arc<PendingTitleStore>,
    projects_root: PathBuf,
    flush_delay_ms: u64,
) {
    while let Some(event) = supervisor_rx.recv().await {
        if let SupervisorEvent::ProcessState { session_id, project_id, state, .. } = &event {
            if matches!(state, ProcessState::UserTurn | ProcessState::Dead) && pending_titles.contains(session_id) {
                let pending_titles = Arc::clone(&pending_titles);
                let session_id = session_id.clone();
                let project_id = project_id.clone();
                let projects_root = projects_root.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(flush_delay_ms)).await;
                    if let Some(title) = pending_titles.take(&session_id) {
                        if let Err(err) = append_custom_title(&projects_root, &project_id, &session_id, &title) {
                            warn!(%session_id, %err, "failed to flush pending session title");
                        }
                    }
                });
            }
        }
        if forward.send(event).await.is_err() {
            break;
        }
    }
}

/// Append a `custom-title` record to a session's transcript file (§4.H).
fn append_custom_title(projects_root: &Path, project_id: &ProjectId, session_id: &SessionId, title: &str) -> std::io::Result<()> {
    use std::io::Write;
    let path = projects_root.join(project_id.as_str()).join(format!("{session_id}.jsonl"));
    let record = serde_json::json!({
        "type": "custom-title",
        "customTitle": title,
        "sessionId": session_id.as_str(),
    });
    let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{record}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_apply_over_defaults() {
        let cli = Cli {
            projects_root: Some(PathBuf::from("/tmp/projects")),
            db_path: Some(PathBuf::from("/tmp/vigil.db")),
            plans_dir: Some(PathBuf::from("/tmp/plans")),
            host: Some("0.0.0.0".to_string()),
            port: Some(9090),
            max_sessions: Some(10),
        };
        let mut config = AppConfig::default();
        cli.apply(&mut config);
        assert_eq!(config.projects_root, "/tmp/projects");
        assert_eq!(config.db_path, "/tmp/vigil.db");
        assert_eq!(config.bind_host, "0.0.0.0");
        assert_eq!(config.bind_port, 9090);
        assert_eq!(config.max_sessions, 10);
        assert_eq!(config.plans_dir, "/tmp/plans");
    }

    #[test]
    fn cli_with_no_overrides_leaves_defaults_untouched() {
        let cli = Cli { projects_root: None, db_path: None, plans_dir: None, host: None, port: None, max_sessions: None };
        let mut config = AppConfig::default();
        let defaults = config.clone();
        cli.apply(&mut config);
        assert_eq!(config, defaults);
    }

    #[test]
    fn append_custom_title_writes_jsonl_record() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let project_id = ProjectId::from("proj1");
        let session_id = SessionId::from("s1");
        std::fs::create_dir_all(root.join("proj1")).unwrap();

        append_custom_title(&root, &project_id, &session_id, "My Title").unwrap();

        let content = std::fs::read_to_string(root.join("proj1").join("s1.jsonl")).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(content.trim()).unwrap();
        assert_eq!(parsed["type"], "custom-title");
        assert_eq!(parsed["customTitle"], "My Title");
        assert_eq!(parsed["sessionId"], "s1");
    }

    #[test]
    fn run_initial_scan_indexes_existing_transcripts_and_reports_ready() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        std::fs::create_dir_all(root.join("proj1")).unwrap();
        std::fs::write(
            root.join("proj1").join("s1.jsonl"),
            "{\"type\":\"user\",\"message\":{\"role\":\"user\",\"content\":[{\"type\":\"text\",\"text\":\"hi\"}]}}\n",
        )
        .unwrap();

        let pool = vigil_transcript::db::open_in_memory(&ConnectionConfig::default()).unwrap();
        let indexer = Indexer::new(TranscriptStore::new(pool), root.clone(), Box::new(StaticRateSchedule::new(default_rates())));
        let startup = StartupProgress::new();

        run_initial_scan(&indexer, &root, &startup);

        let snapshot = startup.snapshot();
        match snapshot {
            vigil_server::ServerEvent::StartupProgress { phase, .. } => assert_eq!(phase, "ready"),
            other => panic!("expected startup_progress event, got {other:?}"),
        }
    }
}
