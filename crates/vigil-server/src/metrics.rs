//! Prometheus metrics recorder and `/metrics` endpoint handler.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Must be called once at server startup before any metrics are recorded.
pub fn install_recorder() -> PrometheusHandle {
    let builder = PrometheusBuilder::new();
    let handle = builder
        .install_recorder()
        .expect("failed to install metrics recorder");
    info!("prometheus metrics recorder installed");
    handle
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos across crates.

/// Client commands dispatched total (counter, labels: command).
pub const COMMANDS_DISPATCHED_TOTAL: &str = "commands_dispatched_total";
/// Client command errors total (counter, labels: command, error_type).
pub const COMMAND_ERRORS_TOTAL: &str = "command_errors_total";
/// WebSocket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Broadcast drops total (counter).
pub const WS_BROADCAST_DROPS_TOTAL: &str = "ws_broadcast_drops_total";
/// Active supervised processes (gauge).
pub const PROCESSES_ACTIVE: &str = "processes_active";
/// Processes spawned total (counter).
pub const PROCESSES_SPAWNED_TOTAL: &str = "processes_spawned_total";
/// Processes killed total (counter, labels: reason).
pub const PROCESSES_KILLED_TOTAL: &str = "processes_killed_total";
/// Timeout sweep kills total (counter, labels: state).
pub const SWEEP_KILLS_TOTAL: &str = "sweep_kills_total";
/// Transcript files synced total (counter, labels: outcome).
pub const TRANSCRIPT_SYNC_TOTAL: &str = "transcript_sync_total";
/// Transcript sync duration seconds (histogram).
pub const TRANSCRIPT_SYNC_DURATION_SECONDS: &str = "transcript_sync_duration_seconds";
/// Items indexed total (counter).
pub const TRANSCRIPT_ITEMS_INDEXED_TOTAL: &str = "transcript_items_indexed_total";
