//! End-to-end integration tests using a real WebSocket client against a
//! bound `VigilServer` (§4.G).

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use vigil_runtime::Supervisor;
use vigil_server::config::ServerConfig;
use vigil_server::server::VigilServer;
use vigil_server::startup::StartupProgress;
use vigil_server::websocket::command::CommandContext;
use vigil_settings::{SupervisorConfig, WrapperLaunchConfig};
use vigil_transcript::db::{open_in_memory, ConnectionConfig};
use vigil_transcript::{PendingTitleStore, TranscriptStore};

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

fn make_ctx() -> Arc<CommandContext> {
    let pool = open_in_memory(&ConnectionConfig::default()).unwrap();
    let store = Arc::new(TranscriptStore::new(pool));
    let (tx, _rx) = tokio::sync::mpsc::channel(16);
    let supervisor = Supervisor::new(SupervisorConfig::default(), tx, Arc::clone(&store), "/tmp/plans".to_string());
    Arc::new(CommandContext {
        supervisor,
        store,
        pending_titles: Arc::new(PendingTitleStore::default()),
        wrapper: WrapperLaunchConfig::default(),
    })
}

fn make_metrics_handle() -> metrics_exporter_prometheus::PrometheusHandle {
    metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder().handle()
}

/// Boot a test server with default config and return the WS URL + server.
async fn boot_server() -> (String, Arc<VigilServer>) {
    boot_server_with(ServerConfig::default(), StartupProgress::new()).await
}

async fn boot_server_with(config: ServerConfig, startup: StartupProgress) -> (String, Arc<VigilServer>) {
    let server = Arc::new(VigilServer::new(config, make_ctx(), 100, Arc::new(startup), make_metrics_handle()));
    let (addr, _handle) = server.listen().await.unwrap();
    (format!("ws://{addr}/ws"), server)
}

async fn connect(url: &str) -> WsStream {
    let (ws, _) = connect_async(url).await.unwrap();
    ws
}

/// Read the next text frame as JSON.
async fn read_json(ws: &mut WsStream) -> Value {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timeout waiting for message")
            .expect("stream closed")
            .expect("ws error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn send_command(ws: &mut WsStream, command: Value) {
    ws.send(Message::text(command.to_string())).await.unwrap();
}

#[tokio::test]
async fn join_receives_active_processes_snapshot_first() {
    let (url, server) = boot_server().await;
    let mut ws = connect(&url).await;

    let msg = read_json(&mut ws).await;
    assert_eq!(msg["type"], "active_processes");
    assert_eq!(msg["processes"].as_array().unwrap().len(), 0);

    server.shutdown().shutdown();
}

#[tokio::test]
async fn join_receives_startup_progress_snapshot_second() {
    let (url, server) = boot_server().await;
    let mut ws = connect(&url).await;

    let _ = read_json(&mut ws).await; // active_processes
    let msg = read_json(&mut ws).await;
    assert_eq!(msg["type"], "startup_progress");
    assert_eq!(msg["phase"], "scanning");

    server.shutdown().shutdown();
}

#[tokio::test]
async fn startup_progress_snapshot_reflects_current_phase() {
    let progress = StartupProgress::new();
    progress.set("indexing", Some("3/10 sessions".to_string()));
    let (url, server) = boot_server_with(ServerConfig::default(), progress).await;
    let mut ws = connect(&url).await;

    let _ = read_json(&mut ws).await; // active_processes
    let msg = read_json(&mut ws).await;
    assert_eq!(msg["type"], "startup_progress");
    assert_eq!(msg["phase"], "indexing");
    assert_eq!(msg["message"], "3/10 sessions");

    server.shutdown().shutdown();
}

#[tokio::test]
async fn ping_command_receives_pong() {
    let (url, server) = boot_server().await;
    let mut ws = connect(&url).await;
    let _ = read_json(&mut ws).await; // active_processes
    let _ = read_json(&mut ws).await; // startup_progress

    send_command(&mut ws, json!({"command": "ping"})).await;
    let msg = read_json(&mut ws).await;
    assert_eq!(msg["type"], "pong");

    server.shutdown().shutdown();
}

#[tokio::test]
async fn invalid_json_frame_receives_error_event() {
    let (url, server) = boot_server().await;
    let mut ws = connect(&url).await;
    let _ = read_json(&mut ws).await;
    let _ = read_json(&mut ws).await;

    ws.send(Message::text("not valid json")).await.unwrap();
    let msg = read_json(&mut ws).await;
    assert_eq!(msg["type"], "error");

    server.shutdown().shutdown();
}

#[tokio::test]
async fn unknown_command_tag_receives_error_event() {
    let (url, server) = boot_server().await;
    let mut ws = connect(&url).await;
    let _ = read_json(&mut ws).await;
    let _ = read_json(&mut ws).await;

    send_command(&mut ws, json!({"command": "not_a_real_command"})).await;
    let msg = read_json(&mut ws).await;
    assert_eq!(msg["type"], "error");

    server.shutdown().shutdown();
}

#[tokio::test]
async fn send_message_without_project_or_session_receives_error() {
    let (url, server) = boot_server().await;
    let mut ws = connect(&url).await;
    let _ = read_json(&mut ws).await;
    let _ = read_json(&mut ws).await;

    send_command(&mut ws, json!({"command": "send_message", "text": "hello"})).await;
    let msg = read_json(&mut ws).await;
    assert_eq!(msg["type"], "error");
    assert!(msg["message"].as_str().unwrap().contains("project"));

    server.shutdown().shutdown();
}

#[tokio::test]
async fn send_message_to_unknown_project_receives_error() {
    let (url, server) = boot_server().await;
    let mut ws = connect(&url).await;
    let _ = read_json(&mut ws).await;
    let _ = read_json(&mut ws).await;

    send_command(
        &mut ws,
        json!({"command": "send_message", "project_id": "nonexistent-project", "text": "hello"}),
    )
    .await;
    let msg = read_json(&mut ws).await;
    assert_eq!(msg["type"], "error");

    server.shutdown().shutdown();
}

#[tokio::test]
async fn kill_process_on_unknown_session_does_not_break_the_connection() {
    let (url, server) = boot_server().await;
    let mut ws = connect(&url).await;
    let _ = read_json(&mut ws).await;
    let _ = read_json(&mut ws).await;

    send_command(&mut ws, json!({"command": "kill_process", "session_id": "nonexistent"})).await;
    // kill_process produces no reply frame; confirm the loop is still alive.
    send_command(&mut ws, json!({"command": "ping"})).await;
    let msg = read_json(&mut ws).await;
    assert_eq!(msg["type"], "pong");

    server.shutdown().shutdown();
}

#[tokio::test]
async fn two_clients_each_get_their_own_snapshot() {
    let (url, server) = boot_server().await;

    let mut ws1 = connect(&url).await;
    let mut ws2 = connect(&url).await;

    let msg1 = read_json(&mut ws1).await;
    let msg2 = read_json(&mut ws2).await;
    assert_eq!(msg1["type"], "active_processes");
    assert_eq!(msg2["type"], "active_processes");

    let _ = read_json(&mut ws1).await; // startup_progress
    let _ = read_json(&mut ws2).await;

    send_command(&mut ws1, json!({"command": "ping"})).await;
    send_command(&mut ws2, json!({"command": "ping"})).await;
    let pong1 = read_json(&mut ws1).await;
    let pong2 = read_json(&mut ws2).await;
    assert_eq!(pong1["type"], "pong");
    assert_eq!(pong2["type"], "pong");

    server.shutdown().shutdown();
}

#[tokio::test]
async fn connection_limit_rejects_additional_upgrade() {
    let config = ServerConfig { max_connections: 1, ..ServerConfig::default() };
    let (url, server) = boot_server_with(config, StartupProgress::new()).await;

    let _ws1 = connect(&url).await;
    // Give the broadcast manager a moment to register the first connection.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let second = connect_async(&url).await;
    assert!(second.is_err(), "second connection should be rejected once at capacity");

    server.shutdown().shutdown();
}

#[tokio::test]
async fn disconnecting_client_is_removed_from_broadcast_manager() {
    let (url, server) = boot_server().await;
    let ws = connect(&url).await;
    drop(ws);

    // Poll briefly for the server to notice the close and evict the
    // connection from the broadcast manager.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if server.broadcast().connection_count().await == 0 {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "connection was never cleaned up");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    server.shutdown().shutdown();
}
