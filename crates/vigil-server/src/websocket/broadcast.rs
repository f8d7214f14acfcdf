//! Event fan-out to connected WebSocket clients (§4.G).

use std::collections::HashMap;
use std::sync::Arc;

use metrics::{counter, gauge};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::connection::ClientConnection;
use crate::events::ServerEvent;
use crate::metrics::{WS_BROADCAST_DROPS_TOTAL, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL};

/// Manages event broadcasting to connected clients, and evicts a client once
/// its cumulative dropped-message count exceeds `max_client_drops` (§4.G: "a
/// connection whose outbound queue overflows repeatedly is disconnected;
/// other clients are unaffected").
pub struct BroadcastManager {
    connections: RwLock<HashMap<String, Arc<ClientConnection>>>,
    max_client_drops: u64,
}

impl BroadcastManager {
    /// Create a new broadcast manager with the configured drop threshold
    /// (§6 tunables: `max_client_drops`, default 100).
    #[must_use]
    pub fn new(max_client_drops: u64) -> Self {
        Self { connections: RwLock::new(HashMap::new()), max_client_drops }
    }

    /// Add a connection.
    pub async fn add(&self, connection: Arc<ClientConnection>) {
        let mut conns = self.connections.write().await;
        let _ = conns.insert(connection.id.clone(), connection);
        counter!(WS_CONNECTIONS_TOTAL).increment(1);
        gauge!(WS_CONNECTIONS_ACTIVE).set(conns.len() as f64);
    }

    /// Remove a connection by ID.
    pub async fn remove(&self, connection_id: &str) {
        let mut conns = self.connections.write().await;
        if conns.remove(connection_id).is_some() {
            counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
            gauge!(WS_CONNECTIONS_ACTIVE).set(conns.len() as f64);
        }
    }

    /// Broadcast an event to all connections bound to the given session.
    pub async fn broadcast_to_session(&self, session_id: &str, event: &ServerEvent) {
        let Some(json) = self.serialize(event) else { return };
        let targets: Vec<Arc<ClientConnection>> = {
            let conns = self.connections.read().await;
            conns.values().filter(|c| c.session_id().as_deref() == Some(session_id)).cloned().collect()
        };
        debug!(session_id, recipients = targets.len(), "broadcast event to session");
        self.send_and_evict(targets, json).await;
    }

    /// Broadcast an event to all connections.
    pub async fn broadcast_all(&self, event: &ServerEvent) {
        let Some(json) = self.serialize(event) else { return };
        let targets: Vec<Arc<ClientConnection>> = {
            let conns = self.connections.read().await;
            conns.values().cloned().collect()
        };
        debug!(recipients = targets.len(), "broadcast event to all");
        self.send_and_evict(targets, json).await;
    }

    fn serialize(&self, event: &ServerEvent) -> Option<Arc<String>> {
        match serde_json::to_string(event) {
            Ok(j) => Some(Arc::new(j)),
            Err(e) => {
                warn!(error = %e, "failed to serialize broadcast event");
                None
            }
        }
    }

    async fn send_and_evict(&self, targets: Vec<Arc<ClientConnection>>, json: Arc<String>) {
        let mut to_evict = Vec::new();
        for conn in &targets {
            if !conn.send(Arc::clone(&json)) && conn.drop_count() >= self.max_client_drops {
                to_evict.push(conn.id.clone());
            }
        }
        if to_evict.is_empty() {
            return;
        }
        let mut conns = self.connections.write().await;
        for id in to_evict {
            if let Some(conn) = conns.remove(&id) {
                warn!(client_id = %conn.id, drops = conn.drop_count(), "disconnecting client after repeated send overflow");
                counter!(WS_BROADCAST_DROPS_TOTAL).increment(1);
                conn.close();
            }
        }
        gauge!(WS_CONNECTIONS_ACTIVE).set(conns.len() as f64);
    }

    /// Number of active connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Get connections bound to a specific session.
    pub async fn session_connections(&self, session_id: &str) -> Vec<Arc<ClientConnection>> {
        let conns = self.connections.read().await;
        conns.values().filter(|c| c.session_id().as_deref() == Some(session_id)).cloned().collect()
    }
}
