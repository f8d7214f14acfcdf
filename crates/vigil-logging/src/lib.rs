//! # vigil-logging
//!
//! Structured logging via `tracing` + `tracing-subscriber`, with an optional
//! second sink that batches events into the embedded `SQLite` store (§10.1).
//!
//! [`init`] installs an `EnvFilter`-driven subscriber: compact output to
//! stderr by default, or JSON lines when `format` is [`LogFormat::Json`].
//! Pass a [`transport::SqliteTransport`] to also persist `warn`/`error`
//! events immediately and everything else in periodic batches.

#![deny(unsafe_code)]

pub mod transport;
pub mod types;

pub use transport::{SqliteTransport, TransportConfig, TransportHandle};
pub use types::{LogEntry, LogLevel, LogQueryOptions};

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Output shape for the stderr subscriber layer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable compact lines (default; fit for a terminal).
    #[default]
    Compact,
    /// One JSON object per line (fit for log aggregation).
    Json,
}

/// Install the global `tracing` subscriber for the process.
///
/// `env_filter` follows the usual `RUST_LOG`-style directive syntax; pass
/// `"info"` for a sane default. `sqlite` is an optional second layer that
/// mirrors events into the embedded store (§10.1); omit it to log to stderr
/// only.
///
/// # Panics
///
/// Panics if a global subscriber has already been installed, matching
/// `tracing`'s own `set_global_default` contract.
pub fn init(env_filter: &str, format: LogFormat, sqlite: Option<SqliteTransport>) {
    let filter = EnvFilter::try_new(env_filter).unwrap_or_else(|_| EnvFilter::new("info"));

    let stderr_layer = match format {
        LogFormat::Compact => fmt::layer().with_target(true).boxed(),
        LogFormat::Json => fmt::layer().json().with_target(true).boxed(),
    };

    let registry = tracing_subscriber::registry().with(filter).with(stderr_layer);

    match sqlite {
        Some(transport) => registry.with(transport).init(),
        None => registry.init(),
    }
}
