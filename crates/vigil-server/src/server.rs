//! `VigilServer` — Axum HTTP + WebSocket server (Broadcast Hub, §4.G).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::compression::CompressionLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;

use tracing::{info, instrument};

use metrics_exporter_prometheus::PrometheusHandle;

use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::shutdown::ShutdownCoordinator;
use crate::startup::StartupProgress;
use crate::websocket::broadcast::BroadcastManager;
use crate::websocket::command::CommandContext;
use crate::websocket::session::run_ws_session;

/// Generates UUIDv7 request IDs.
#[derive(Clone)]
struct UuidV7RequestId;

impl MakeRequestId for UuidV7RequestId {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        let id = uuid::Uuid::now_v7().to_string();
        axum::http::HeaderValue::from_str(&id).ok().map(RequestId::new)
    }
}

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Command dispatch context (supervisor, transcript store, pending titles).
    pub ctx: Arc<CommandContext>,
    /// Broadcast manager for event fan-out.
    pub broadcast: Arc<BroadcastManager>,
    /// Startup-phase progress, snapshotted at join time.
    pub startup: Arc<StartupProgress>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Server configuration.
    pub config: ServerConfig,
    /// Prometheus metrics handle for rendering.
    pub metrics_handle: Arc<PrometheusHandle>,
}

/// The Broadcast Hub's HTTP + WebSocket server.
pub struct VigilServer {
    config: ServerConfig,
    ctx: Arc<CommandContext>,
    broadcast: Arc<BroadcastManager>,
    startup: Arc<StartupProgress>,
    shutdown: Arc<ShutdownCoordinator>,
    metrics_handle: Arc<PrometheusHandle>,
    start_time: Instant,
}

impl VigilServer {
    /// Create a new server around an already-wired command context.
    #[must_use]
    pub fn new(
        config: ServerConfig,
        ctx: Arc<CommandContext>,
        max_client_drops: u64,
        startup: Arc<StartupProgress>,
        metrics_handle: PrometheusHandle,
    ) -> Self {
        Self {
            config,
            ctx,
            broadcast: Arc::new(BroadcastManager::new(max_client_drops)),
            startup,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            metrics_handle: Arc::new(metrics_handle),
            start_time: Instant::now(),
        }
    }

    /// Build the Axum router with all routes and middleware.
    pub fn router(&self) -> Router {
        let state = AppState {
            ctx: self.ctx.clone(),
            broadcast: self.broadcast.clone(),
            startup: self.startup.clone(),
            shutdown: self.shutdown.clone(),
            start_time: self.start_time,
            config: self.config.clone(),
            metrics_handle: self.metrics_handle.clone(),
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/ws", get(ws_upgrade_handler))
            .with_state(state)
            // Outermost layers execute first on request, last on response.
            .layer(CatchPanicLayer::new())
            .layer(CompressionLayer::new())
            .layer(RequestBodyLimitLayer::new(1024 * 1024)) // 1 MB
            .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, Duration::from_secs(30)))
            .layer(SetRequestIdLayer::x_request_id(UuidV7RequestId))
            .layer(PropagateRequestIdLayer::x_request_id())
    }

    /// Bind to a TCP port and start serving. Returns the bound address and a
    /// join handle for the server task.
    #[instrument(skip_all, fields(host = %self.config.host, port = self.config.port))]
    pub async fn listen(&self) -> Result<(SocketAddr, tokio::task::JoinHandle<()>), std::io::Error> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let bound_addr = listener.local_addr()?;

        info!(addr = %bound_addr, "server started");

        let router = self.router();
        let shutdown_token = self.shutdown.token();

        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    shutdown_token.cancelled().await;
                    info!("server shutdown initiated");
                })
                .await;
            info!("server shutdown complete");
        });

        Ok((bound_addr, handle))
    }

    /// Get the broadcast manager.
    #[must_use]
    pub fn broadcast(&self) -> &Arc<BroadcastManager> {
        &self.broadcast
    }

    /// Get the shutdown coordinator.
    #[must_use]
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get the command dispatch context.
    #[must_use]
    pub fn ctx(&self) -> &Arc<CommandContext> {
        &self.ctx
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let connections = state.broadcast.connection_count().await;
    let sessions = state.ctx.supervisor.active_count();
    Json(health::health_check(state.start_time, connections, sessions))
}

/// GET /metrics — Prometheus text format.
async fn metrics_handler(State(state): State<AppState>) -> String {
    state.metrics_handle.render()
}

/// GET /ws — WebSocket upgrade handler.
async fn ws_upgrade_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Result<impl IntoResponse, StatusCode> {
    let current = state.broadcast.connection_count().await;
    if current >= state.config.max_connections {
        tracing::warn!(current, max = state.config.max_connections, "connection limit reached, rejecting WebSocket upgrade");
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    let client_id = uuid::Uuid::now_v7().to_string();
    let ctx = state.ctx;
    let supervisor = ctx.supervisor.clone();
    let startup = state.startup;
    let broadcast = state.broadcast;
    let max_message_size = state.config.max_message_size;

    Ok(ws
        .max_message_size(max_message_size)
        .on_upgrade(move |socket| run_ws_session(socket, client_id, ctx, supervisor, startup, broadcast)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;
    use vigil_runtime::{Supervisor, SupervisorEvent};
    use vigil_settings::WrapperLaunchConfig;
    use vigil_transcript::db::{open_in_memory, ConnectionConfig};
    use vigil_transcript::{PendingTitleStore, TranscriptStore};

    fn make_ctx() -> (Arc<CommandContext>, tokio::sync::mpsc::Receiver<SupervisorEvent>) {
        let pool = open_in_memory(&ConnectionConfig::default()).unwrap();
        let store = Arc::new(TranscriptStore::new(pool));
        let (tx, rx) = tokio::sync::mpsc::channel(16);
        let supervisor = Supervisor::new(
            vigil_settings::SupervisorConfig::default(),
            tx,
            Arc::clone(&store),
            "/tmp/plans".to_string(),
        );
        let ctx = Arc::new(CommandContext {
            supervisor,
            store,
            pending_titles: Arc::new(PendingTitleStore::default()),
            wrapper: WrapperLaunchConfig::default(),
        });
        (ctx, rx)
    }

    fn make_metrics_handle() -> PrometheusHandle {
        metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder().handle()
    }

    fn make_server() -> VigilServer {
        let (ctx, _rx) = make_ctx();
        VigilServer::new(ServerConfig::default(), ctx, 100, Arc::new(StartupProgress::new()), make_metrics_handle())
    }

    #[tokio::test]
    async fn server_with_default_config() {
        let server = make_server();
        assert_eq!(server.config().host, "127.0.0.1");
        assert_eq!(server.config().port, 0);
    }

    #[tokio::test]
    async fn broadcast_manager_accessible() {
        let server = make_server();
        assert_eq!(server.broadcast().connection_count().await, 0);
    }

    #[test]
    fn shutdown_coordinator_accessible() {
        let server = make_server();
        assert!(!server.shutdown().is_shutting_down());
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let server = make_server();
        let app = server.router();

        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert!(parsed["connections"].is_number());
    }

    #[tokio::test]
    async fn ws_endpoint_requires_upgrade() {
        let server = make_server();
        let app = server.router();

        let req = Request::builder().uri("/ws").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_ne!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let server = make_server();
        let app = server.router();

        let req = Request::builder().uri("/nonexistent").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn server_with_custom_config() {
        let config = ServerConfig { host: "0.0.0.0".into(), port: 9090, max_connections: 10, ..ServerConfig::default() };
        let (ctx, _rx) = make_ctx();
        let server = VigilServer::new(config, ctx, 100, Arc::new(StartupProgress::new()), make_metrics_handle());
        assert_eq!(server.config().host, "0.0.0.0");
        assert_eq!(server.config().port, 9090);
        assert_eq!(server.config().max_connections, 10);
    }

    #[tokio::test]
    async fn shutdown_propagates_to_coordinator() {
        let server = make_server();
        let shutdown = server.shutdown().clone();
        assert!(!shutdown.is_shutting_down());
        shutdown.shutdown();
        assert!(server.shutdown().is_shutting_down());
    }

    #[tokio::test]
    async fn server_listen_binds_port() {
        let server = make_server();
        let (addr, handle) = server.listen().await.unwrap();

        assert_ne!(addr.port(), 0);
        assert_eq!(addr.ip().to_string(), "127.0.0.1");

        server.shutdown().shutdown();
        let _ = handle.await;
    }

    #[tokio::test]
    async fn server_graceful_shutdown() {
        let server = make_server();
        let (_, handle) = server.listen().await.unwrap();

        server.shutdown().shutdown();
        tokio::time::timeout(std::time::Duration::from_secs(5), handle).await.expect("shutdown timed out").expect("join error");
    }
}
