//! # vigil-watch
//!
//! Filesystem Watcher (§4.D): recursive OS-level watch over the projects
//! root, dispatching project/session/subagent change events to the indexer
//! and project-lifecycle handler.

#![deny(unsafe_code)]

pub mod errors;
pub mod watcher;

pub use errors::WatchError;
pub use watcher::{ChangeKind, Watcher, WatchEvent, WatcherConfig};
