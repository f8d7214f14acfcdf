//! # vigil-runtime
//!
//! Process Supervisor: spawns and tracks one child-process wrapper per
//! session, arbitrates tool-permission prompts, and runs the timeout sweep
//! that kills stale processes (§4.E, §4.F).

#![deny(unsafe_code)]

pub mod errors;
pub mod supervisor;
pub mod types;
pub mod wrapper;

pub use errors::RuntimeError;
pub use supervisor::{Supervisor, SupervisorEvent};
pub use types::{
    process_snapshot_from_transition, PendingPermissionRequest, PermissionMode, PermissionResponse,
    PermissionSuggestion, ProcessRecord, ProcessSnapshot, ProcessState,
};
pub use wrapper::{ChildWrapper, WrapperEvent, WrapperSpawnConfig};
