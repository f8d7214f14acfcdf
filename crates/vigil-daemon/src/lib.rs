//! Shared library modules for the `vigil-daemon` binary and its tests.
//!
//! The binary (`main.rs`) wires every crate together and starts the
//! Broadcast Hub. This `lib.rs` exposes modules shared between `main.rs`
//! and integration tests.

#![deny(unsafe_code)]

pub mod db_path_policy;
