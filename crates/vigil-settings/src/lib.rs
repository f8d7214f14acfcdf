//! # vigil-settings
//!
//! Layered configuration for a vigil daemon instance.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** — [`AppConfig::default()`]
//! 2. **User file** — `~/.vigil/settings.json` (deep-merged over defaults)
//! 3. **Environment variables** — `VIGIL_*` overrides (highest priority)
//!
//! CLI flags (projects root, db path, bind address/port, `--max-sessions`,
//! §10.4) are applied by the daemon binary on top of the loaded [`AppConfig`],
//! since `clap` parsing lives at the binary boundary, not in this crate.
//!
//! # Usage
//!
//! ```no_run
//! use vigil_settings::{get_settings, AppConfig};
//!
//! let config = get_settings();
//! println!("bind port: {}", config.bind_port);
//! ```

#![deny(unsafe_code)]

pub mod config;
pub mod errors;
pub mod loader;

pub use config::{AppConfig, SupervisorConfig};
pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};

use std::sync::OnceLock;

pub(crate) const PACKAGE_VERSION: &str = env!("CARGO_PKG_VERSION");
pub(crate) const PACKAGE_NAME: &str = "vigil";

/// Global settings singleton.
///
/// Initialized on first access via [`get_settings`]. Loaded from
/// `~/.vigil/settings.json` with env var overrides, falling back to compiled
/// defaults if loading fails.
static SETTINGS: OnceLock<AppConfig> = OnceLock::new();

/// Get the global settings instance.
///
/// On first call, loads settings from `~/.vigil/settings.json` with env var
/// overrides. On subsequent calls, returns the cached value. If loading
/// fails, returns compiled defaults.
pub fn get_settings() -> &'static AppConfig {
    SETTINGS.get_or_init(|| load_settings().unwrap_or_default())
}

/// Initialize the global settings with a specific value.
///
/// # Errors
///
/// Returns the provided config back if the global was already initialized.
#[allow(clippy::result_large_err)]
pub fn init_settings(config: AppConfig) -> std::result::Result<(), AppConfig> {
    SETTINGS.set(config)
}
