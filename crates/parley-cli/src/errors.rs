//! Failures of the `parley` binary.

use std::io;
use std::sync::Arc;

use parley::responder::ListenerError;
use parley::{DispatchError, TelemetryError};
use thiserror::Error;

use crate::signal::ShutdownError;

#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error("failed to load configuration: {0}")]
    LoadConfiguration(Arc<ortho_config::OrthoError>),
    #[error("{0}")]
    CliUsage(clap::Error),
    #[error("failed to initialise telemetry: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error("failed to run reply server: {0}")]
    Server(#[from] ListenerError),
    #[error(transparent)]
    Shutdown(#[from] ShutdownError),
    #[error("failed to dispatch: {0}")]
    Dispatch(#[from] DispatchError),
    #[error("failed to read script input: {0}")]
    ReadScript(#[source] io::Error),
    #[error("failed to serialise output: {0}")]
    Serialise(#[source] serde_json::Error),
    #[error("failed to write output: {0}")]
    WriteOutput(#[source] io::Error),
}
