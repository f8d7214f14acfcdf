//! # vigil-transcript
//!
//! Transcript Store, Derived-Metadata Engine, and Incremental Indexer: tails
//! append-only per-session JSONL transcripts, classifies and costs each
//! record, and persists the result to an embedded `SQLite` database (§4.A-§4.C,
//! §4.H).

#![deny(unsafe_code)]

pub mod db;
pub mod errors;
pub mod indexer;
pub mod metadata;
pub mod migrations;
pub mod model;
pub mod pending_title;
pub mod store;

pub use db::{ConnectionConfig, ConnectionPool};
pub use errors::TranscriptError;
pub use indexer::{parse_session_path, Indexer, RateSchedule, SessionPath, StaticRateSchedule, SyncOutcome};
pub use model::{AgentLink, DisplayLevel, ItemKind, Project, Session, SessionItem, ToolResultLink};
pub use pending_title::PendingTitleStore;
pub use store::{DerivedFields, LineRange, TranscriptStore};
