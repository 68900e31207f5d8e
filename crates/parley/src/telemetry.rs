//! `tracing` subscriber installation for hosts embedding the engine.

use std::io::{self, IsTerminal};

use once_cell::sync::OnceCell;
use parley_config::{Config, LogFormat};
use tracing::Subscriber;
use tracing::subscriber::SetGlobalDefaultError;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::{self, time::UtcTime};

static INSTALLED: OnceCell<LogFormat> = OnceCell::new();

/// Errors raised while installing the subscriber.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// The configured filter expression does not parse.
    #[error("invalid log filter '{filter}': {message}")]
    Filter {
        /// Offending expression.
        filter: String,
        /// Parser diagnostic.
        message: String,
    },
    /// Another global subscriber is already installed.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(#[source] SetGlobalDefaultError),
}

/// Installs the global subscriber described by `config` on first call.
///
/// Later calls leave the installed subscriber in place and return the format
/// chosen by the first one.
///
/// # Errors
///
/// Returns [`TelemetryError`] when the filter is invalid or a subscriber
/// installed outside this function is already registered.
pub fn initialise(config: &Config) -> Result<LogFormat, TelemetryError> {
    INSTALLED
        .get_or_try_init(|| {
            install(config)?;
            Ok(config.log_format())
        })
        .copied()
}

fn install(config: &Config) -> Result<(), TelemetryError> {
    let filter = EnvFilter::try_new(config.log_filter()).map_err(|error| TelemetryError::Filter {
        filter: config.log_filter().to_owned(),
        message: error.to_string(),
    })?;

    // Workers are named threads; their names identify which one handled an
    // exchange.
    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .with_timer(UtcTime::rfc_3339());

    let subscriber: Box<dyn Subscriber + Send + Sync> = match config.log_format() {
        LogFormat::Json => Box::new(builder.json().flatten_event(true).finish()),
        LogFormat::Compact => Box::new(builder.compact().finish()),
    };
    tracing::subscriber::set_global_default(subscriber).map_err(TelemetryError::Subscriber)
}
