//! Blocking wait for a termination request.

use std::io;

use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;
use thiserror::Error;
use tracing::info;

const SIGNAL_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::signal");

/// Something `parley serve` can block on until it should stop.
pub(crate) trait ShutdownSignal {
    /// Blocks until shutdown should proceed.
    fn wait(&self) -> Result<(), ShutdownError>;
}

#[derive(Debug, Error)]
pub(crate) enum ShutdownError {
    #[error("failed to install signal handlers: {source}")]
    Install {
        #[source]
        source: io::Error,
    },
}

/// Waits for SIGINT, SIGTERM, SIGQUIT or SIGHUP.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct SystemShutdownSignal;

impl ShutdownSignal for SystemShutdownSignal {
    fn wait(&self) -> Result<(), ShutdownError> {
        let mut signals = Signals::new([SIGTERM, SIGINT, SIGQUIT, SIGHUP])
            .map_err(|source| ShutdownError::Install { source })?;
        if let Some(signal) = signals.forever().next() {
            info!(target: SIGNAL_TARGET, signal, "shutdown signal received");
        }
        Ok(())
    }
}
