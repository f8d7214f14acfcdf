//! # vigil-core
//!
//! Foundation types shared across the vigil workspace: branded ids, the
//! transcript content-block vocabulary, token usage/cost, backoff math, and
//! the storage/parse error taxonomy.

#![deny(unsafe_code)]

pub mod constants;
pub mod content;
pub mod errors;
pub mod ids;
pub mod retry;
pub mod usage;

pub use errors::CoreError;
pub use ids::{ProjectId, RequestId, SessionId};
pub use usage::{Cost, ModelRates, TokenUsage};
