//! WebSocket session lifecycle — handles a single connected client from
//! upgrade through disconnect (§4.G).

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use vigil_runtime::Supervisor;

use super::broadcast::BroadcastManager;
use super::command::{ClientCommand, CommandContext, CommandOutcome};
use super::connection::ClientConnection;
use crate::events::ServerEvent;
use crate::startup::StartupProgress;

/// Runs a WebSocket session for a connected client, from join to teardown.
///
/// On join, sends an `active_processes` and a `startup_progress` snapshot
/// (§4.G: "Join... immediately sends a snapshot of currently active processes
/// and current startup-phase progress"). Incoming text frames are parsed as
/// [`ClientCommand`]s and dispatched through `ctx`; the session loop also
/// races against the connection's forced-close signal so a client evicted by
/// the broadcast manager's drop-threshold tears down promptly.
pub async fn run_ws_session(
    ws: WebSocket,
    client_id: String,
    ctx: Arc<CommandContext>,
    supervisor: Arc<Supervisor>,
    startup: Arc<StartupProgress>,
    broadcast: Arc<BroadcastManager>,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    let (send_tx, mut send_rx) = mpsc::channel::<Arc<String>>(256);
    let connection = Arc::new(ClientConnection::new(client_id.clone(), send_tx));
    broadcast.add(connection.clone()).await;

    send_event(&connection, &ServerEvent::ActiveProcesses { processes: supervisor.active_snapshots() });
    send_event(&connection, &startup.snapshot());

    let outbound = tokio::spawn(async move {
        while let Some(msg) = send_rx.recv().await {
            if ws_tx.send(Message::Text((*msg).clone().into())).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            () = connection.closed() => {
                debug!(client_id, "connection force-closed by broadcast manager");
                break;
            }
            frame = ws_rx.next() => {
                let Some(Ok(frame)) = frame else { break };
                match frame {
                    Message::Text(text) => handle_text_frame(&ctx, &connection, &text).await,
                    Message::Ping(_) | Message::Pong(_) => connection.mark_alive(),
                    Message::Close(_) => break,
                    Message::Binary(_) => {}
                }
            }
        }
    }

    outbound.abort();
    broadcast.remove(&client_id).await;
}

async fn handle_text_frame(ctx: &CommandContext, connection: &ClientConnection, text: &str) {
    let command: ClientCommand = match serde_json::from_str(text) {
        Ok(command) => command,
        Err(err) => {
            warn!(%err, "failed to parse client command");
            connection.send_json(&serde_json::json!({ "type": "error", "message": err.to_string() }));
            return;
        }
    };
    match ctx.dispatch(command).await {
        Ok(CommandOutcome::Session(session_id)) => connection.bind_session(session_id.into_inner()),
        Ok(CommandOutcome::Pong) => {
            connection.mark_alive();
            connection.send_json(&serde_json::to_value(ServerEvent::Pong).unwrap_or_default());
        }
        Err(err) => {
            warn!(%err, "command dispatch failed");
            connection.send_json(&serde_json::json!({ "type": "error", "message": err.to_string() }));
        }
    }
}

fn send_event(connection: &ClientConnection, event: &ServerEvent) {
    connection.send_json(&serde_json::to_value(event).unwrap_or_default());
}
