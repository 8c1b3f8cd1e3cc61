//! Process-wide `tracing` subscriber setup.
//!
//! The library crates only emit spans and events; installing a subscriber is
//! left to the binary. [`try_init`] builds one from a [`LogConfig`]:
//!
//! ```no_run
//! use eventstore::logging::{LogConfig, LogFormat};
//!
//! eventstore::telemetry::try_init(&LogConfig {
//!     level: "info,eventstore_postgres=debug".to_string(),
//!     format: LogFormat::Json,
//! })
//! .expect("logging is initialised once");
//! ```

use eventstore_core::logging::{LogConfig, LogFormat};
use tracing_subscriber::{
    EnvFilter,
    filter::ParseError,
    fmt,
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
};

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("invalid log filter: {0}")]
    Filter(#[from] ParseError),
    #[error("failed to install the global subscriber: {0}")]
    Init(#[from] TryInitError),
}

/// Install a global subscriber formatted and filtered according to `config`.
///
/// `RUST_LOG`, when set and valid, takes precedence over `config.level`.
///
/// # Errors
///
/// Returns [`TelemetryError::Filter`] for an unparsable level directive and
/// [`TelemetryError::Init`] if a global subscriber is already installed.
pub fn try_init(config: &LogConfig) -> Result<(), TelemetryError> {
    let filter = env_filter(config)?;

    match config.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()?,
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().pretty())
            .try_init()?,
    }

    tracing::debug!(level = %config.level, format = ?config.format, "logging initialised");
    Ok(())
}

/// Like [`try_init`], but never fails.
///
/// An unparsable level falls back to the default level; an already installed
/// subscriber is kept.
pub fn init(config: &LogConfig) {
    match try_init(config) {
        Ok(()) | Err(TelemetryError::Init(_)) => {}
        Err(TelemetryError::Filter(error)) => {
            let fallback = LogConfig {
                level: LogConfig::default().level,
                format: config.format,
            };
            if try_init(&fallback).is_ok() {
                tracing::warn!(%error, level = %config.level, "invalid log level, using default");
            }
        }
    }
}

fn env_filter(config: &LogConfig) -> Result<EnvFilter, ParseError> {
    EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.level))
}
