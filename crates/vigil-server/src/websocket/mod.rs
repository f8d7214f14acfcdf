//! WebSocket connection management, heartbeat, command dispatch, and broadcasting.

pub mod broadcast;
pub mod command;
pub mod connection;
pub mod event_bridge;
pub mod heartbeat;
pub mod session;
