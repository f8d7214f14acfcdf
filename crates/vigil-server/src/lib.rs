//! # vigil-server
//!
//! Broadcast Hub (§4.G): Axum HTTP + `WebSocket` server and event
//! broadcasting.
//!
//! - HTTP endpoints: health check, Prometheus metrics
//! - `WebSocket` gateway: connection management, heartbeat, command dispatch
//! - Event fan-out to connected clients via `BroadcastManager`, fed by the
//!   Process Supervisor and Filesystem Watcher through `EventBridge`
//! - Graceful shutdown via `CancellationToken` coordination

#![deny(unsafe_code)]

pub mod config;
pub mod events;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod startup;
pub mod websocket;

pub use events::ServerEvent;
