//! Filesystem Watcher (§4.D): recursively watches the projects root and
//! dispatches three logical event kinds to callers (typically the indexer
//! and a project-lifecycle handler).
//!
//! A bounded channel sits between the OS-level `notify` callback (which runs
//! on notify's own thread, not on a tokio task) and the async event loop. If
//! that channel fills, the drop is counted rather than silently swallowed,
//! and the next drain triggers a full re-scan of the watched root so no
//! mutation is permanently lost under sustained overflow.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::errors::Result;
use vigil_transcript::{parse_session_path, SessionPath};

/// Whether a watched path was touched or has disappeared.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeKind {
    /// Created or modified.
    Modified,
    /// Removed from disk.
    Removed,
}

/// One of the three logical events the watcher dispatches (§4.D).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WatchEvent {
    /// A direct child directory of the projects root appeared or vanished.
    ProjectChanged { project_dir: String, change: ChangeKind },
    /// A primary session transcript changed.
    SessionChanged { path: PathBuf, change: ChangeKind },
    /// A subagent transcript changed.
    SubagentChanged { path: PathBuf, change: ChangeKind },
}

/// Tuning knobs for the watcher's internal channel.
#[derive(Clone, Debug)]
pub struct WatcherConfig {
    /// Capacity of both the raw OS-event channel and the dispatch channel.
    pub channel_capacity: usize,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self { channel_capacity: 1024 }
    }
}

/// Owns the OS-level watch handle and the event-dispatch loop.
pub struct Watcher {
    projects_root: PathBuf,
    overflow_count: Arc<AtomicU64>,
    cancel: CancellationToken,
    // Held only to keep the OS-level watch alive; never read again after start.
    _fs_watcher: Mutex<RecommendedWatcher>,
}

impl Watcher {
    /// Start watching `projects_root`, returning the watcher handle plus the
    /// channel callers should drain for dispatched events.
    pub fn start(projects_root: PathBuf, config: &WatcherConfig) -> Result<(Arc<Self>, mpsc::Receiver<WatchEvent>)> {
        let (raw_tx, raw_rx) = mpsc::channel::<(PathBuf, EventKind)>(config.channel_capacity);
        let overflow_count = Arc::new(AtomicU64::new(0));
        let overflow_for_callback = Arc::clone(&overflow_count);

        let mut fs_watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for path in event.paths {
                    if raw_tx.try_send((path, event.kind)).is_err() {
                        overflow_for_callback.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
            Err(e) => warn!(error = %e, "filesystem watch callback error"),
        })?;
        fs_watcher.watch(&projects_root, RecursiveMode::Recursive)?;

        let (dispatch_tx, dispatch_rx) = mpsc::channel(config.channel_capacity);
        let watcher = Arc::new(Self {
            projects_root,
            overflow_count,
            cancel: CancellationToken::new(),
            _fs_watcher: Mutex::new(fs_watcher),
        });
        watcher.clone().spawn_event_loop(raw_rx, dispatch_tx);
        Ok((watcher, dispatch_rx))
    }

    /// Signal the event loop to stop; the OS-level watch is dropped when the
    /// handle itself is dropped.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    fn spawn_event_loop(
        self: Arc<Self>,
        mut raw_rx: mpsc::Receiver<(PathBuf, EventKind)>,
        dispatch_tx: mpsc::Sender<WatchEvent>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut last_overflow = 0u64;
            loop {
                tokio::select! {
                    () = self.cancel.cancelled() => break,
                    received = raw_rx.recv() => {
                        let Some((path, kind)) = received else { break };
                        if let Some(event) = classify(&self.projects_root, &path, kind) {
                            if dispatch_tx.send(event).await.is_err() {
                                break;
                            }
                        }
                        let overflow_now = self.overflow_count.load(Ordering::Relaxed);
                        if overflow_now != last_overflow {
                            debug!(dropped = overflow_now - last_overflow, "watch channel overflowed, triggering full re-scan");
                            last_overflow = overflow_now;
                            if !self.rescan(&dispatch_tx).await {
                                break;
                            }
                        }
                    }
                }
            }
        })
    }

    /// Walk the entire watched root and dispatch a synthetic `Modified`
    /// event for every project directory and transcript file found, so no
    /// mutation is permanently lost after a sustained channel overflow (§4.D,
    /// §9 "Watcher overflow re-scan"). Returns `false` if the dispatch
    /// channel has closed and the caller should stop.
    async fn rescan(&self, dispatch_tx: &mpsc::Sender<WatchEvent>) -> bool {
        let root = self.projects_root.clone();
        let events = tokio::task::spawn_blocking(move || scan_all(&root)).await.unwrap_or_default();
        for event in events {
            if dispatch_tx.send(event).await.is_err() {
                return false;
            }
        }
        true
    }
}

fn classify(projects_root: &Path, path: &Path, kind: EventKind) -> Option<WatchEvent> {
    let change = match kind {
        EventKind::Remove(_) => ChangeKind::Removed,
        EventKind::Create(_) | EventKind::Modify(_) => ChangeKind::Modified,
        _ => return None,
    };

    if path.parent() == Some(projects_root) {
        let project_dir = path.file_name()?.to_string_lossy().into_owned();
        return Some(WatchEvent::ProjectChanged { project_dir, change });
    }

    match parse_session_path(projects_root, path) {
        Some(SessionPath::Primary { .. }) => Some(WatchEvent::SessionChanged { path: path.to_path_buf(), change }),
        Some(SessionPath::Subagent { .. }) => Some(WatchEvent::SubagentChanged { path: path.to_path_buf(), change }),
        None => None,
    }
}

fn scan_all(projects_root: &Path) -> Vec<WatchEvent> {
    let mut events = Vec::new();
    for entry in WalkDir::new(projects_root).into_iter().filter_map(std::result::Result::ok) {
        let path = entry.path();
        if path == projects_root {
            continue;
        }
        if entry.file_type().is_dir() {
            if path.parent() == Some(projects_root) {
                if let Some(name) = path.file_name() {
                    events.push(WatchEvent::ProjectChanged {
                        project_dir: name.to_string_lossy().into_owned(),
                        change: ChangeKind::Modified,
                    });
                }
            }
            continue;
        }
        match parse_session_path(projects_root, path) {
            Some(SessionPath::Primary { .. }) => {
                events.push(WatchEvent::SessionChanged { path: path.to_path_buf(), change: ChangeKind::Modified });
            }
            Some(SessionPath::Subagent { .. }) => {
                events.push(WatchEvent::SubagentChanged { path: path.to_path_buf(), change: ChangeKind::Modified });
            }
            None => {}
        }
    }
    events
}
