//! Structured reporting of engine lifecycle events.

use std::sync::Arc;

use crate::dialogue::Dialogue;
use crate::invoker::InvocationFailure;
use crate::transport::TransportError;

const REPORTER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::lifecycle");

/// Observer trait used to surface engine events to telemetry sinks.
pub trait Reporter: Send + Sync {
    /// A connection entry was created for `address`.
    fn connection_opened(&self, address: &str);

    /// The transport could not open a connection for `address`.
    fn connection_failed(&self, address: &str, error: &TransportError);

    /// A worker thread started.
    fn worker_started(&self, worker: usize);

    /// A worker thread left its loop and removed itself from the pool.
    fn worker_stopped(&self, worker: usize);

    /// A dialogue ended without a reply.
    fn dialogue_failed(&self, dialogue: &Dialogue, failure: &InvocationFailure);

    /// Shutdown finished after closing `connections` cached connections.
    fn shutdown_completed(&self, connections: usize);
}

impl<T> Reporter for Arc<T>
where
    T: Reporter + ?Sized,
{
    fn connection_opened(&self, address: &str) {
        (**self).connection_opened(address);
    }

    fn connection_failed(&self, address: &str, error: &TransportError) {
        (**self).connection_failed(address, error);
    }

    fn worker_started(&self, worker: usize) {
        (**self).worker_started(worker);
    }

    fn worker_stopped(&self, worker: usize) {
        (**self).worker_stopped(worker);
    }

    fn dialogue_failed(&self, dialogue: &Dialogue, failure: &InvocationFailure) {
        (**self).dialogue_failed(dialogue, failure);
    }

    fn shutdown_completed(&self, connections: usize) {
        (**self).shutdown_completed(connections);
    }
}

/// Default reporter that records events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredReporter;

impl StructuredReporter {
    /// Builds a new reporter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Reporter for StructuredReporter {
    fn connection_opened(&self, address: &str) {
        tracing::debug!(
            target: REPORTER_TARGET,
            event = "connection_opened",
            address,
            "connection cached"
        );
    }

    fn connection_failed(&self, address: &str, error: &TransportError) {
        tracing::warn!(
            target: REPORTER_TARGET,
            event = "connection_failed",
            address,
            error = %error,
            "failed to open connection"
        );
    }

    fn worker_started(&self, worker: usize) {
        tracing::debug!(
            target: REPORTER_TARGET,
            event = "worker_started",
            worker,
            "worker started"
        );
    }

    fn worker_stopped(&self, worker: usize) {
        tracing::debug!(
            target: REPORTER_TARGET,
            event = "worker_stopped",
            worker,
            "worker stopped"
        );
    }

    fn dialogue_failed(&self, dialogue: &Dialogue, failure: &InvocationFailure) {
        tracing::warn!(
            target: REPORTER_TARGET,
            event = "dialogue_failed",
            address = dialogue.address(),
            submitted = dialogue.time_submitted().as_micros(),
            failure = %failure,
            "failed to get a response"
        );
    }

    fn shutdown_completed(&self, connections: usize) {
        tracing::info!(
            target: REPORTER_TARGET,
            event = "shutdown_completed",
            connections,
            "engine shut down"
        );
    }
}
