//! The engine facade: synchronous and asynchronous submission, retrieval and
//! shutdown.
//!
//! An [`Engine`] owns its registry, queues and worker pool. Hosts that need a
//! single engine per process use [`Engine::global`]; everything else builds
//! its own instance, usually over a test transport.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use once_cell::sync::Lazy;
use parley_config::Config;
use thiserror::Error;
use tracing::{debug, warn};

use crate::clock::Timestamp;
use crate::dialogue::Dialogue;
use crate::invoker::Invoker;
use crate::queue::DialogueQueue;
use crate::registry::ConnectionRegistry;
use crate::reporter::{Reporter, StructuredReporter};
use crate::transport::{SocketTransport, Transport, TransportError};
use crate::worker::{WorkerContext, WorkerError, WorkerPool};

const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");

/// Errors surfaced by the dispatch facade.
///
/// Timeouts and transport failures never appear here; they are recorded on
/// the dialogue itself.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No worker could be started to process the submission.
    #[error("failed to start a worker: {0}")]
    SpawnWorker(#[from] WorkerError),
}

/// Tunables of an [`Engine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Timeout applied to newly opened connections.
    pub reply_timeout: Duration,
    /// Workers started when the asynchronous path finds none running.
    pub worker_count: usize,
    /// Interval an idle worker waits before re-checking its flag.
    pub worker_idle: Duration,
    /// Upper bound between re-checks while a retrieval waits.
    pub drain_poll: Duration,
    /// Upper bound between re-checks while shutdown waits for workers.
    pub shutdown_poll: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for EngineSettings {
    fn from(config: &Config) -> Self {
        Self {
            reply_timeout: config.reply_timeout(),
            worker_count: config.worker_count(),
            worker_idle: config.worker_idle(),
            drain_poll: config.drain_poll(),
            shutdown_poll: config.shutdown_poll(),
        }
    }
}

#[derive(Debug, Default)]
struct Correlation {
    submitted: u64,
    last_submitted: Option<Timestamp>,
    last_fetched: Option<Timestamp>,
}

static GLOBAL: Lazy<Engine> =
    Lazy::new(|| Engine::new(Arc::new(SocketTransport::new()), EngineSettings::default()));

/// Request/reply dispatch engine.
pub struct Engine {
    settings: EngineSettings,
    transport: Arc<dyn Transport>,
    reporter: Arc<dyn Reporter>,
    registry: Arc<ConnectionRegistry>,
    invoker: Arc<Invoker>,
    pending: Arc<DialogueQueue>,
    completed: Arc<DialogueQueue>,
    pool: WorkerPool,
    correlation: Mutex<Correlation>,
}

impl Engine {
    /// Builds an engine over `transport` reporting through `tracing`.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, settings: EngineSettings) -> Self {
        Self::with_reporter(transport, settings, Arc::new(StructuredReporter::new()))
    }

    /// Builds an engine with a custom lifecycle reporter.
    #[must_use]
    pub fn with_reporter(
        transport: Arc<dyn Transport>,
        settings: EngineSettings,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(
            Arc::clone(&transport),
            settings.reply_timeout,
            Arc::clone(&reporter),
        ));
        let invoker = Arc::new(Invoker::new(Arc::clone(&registry), Arc::clone(&reporter)));
        Self {
            settings,
            transport,
            reporter,
            registry,
            invoker,
            pending: Arc::new(DialogueQueue::new()),
            completed: Arc::new(DialogueQueue::new()),
            pool: WorkerPool::new(settings.worker_count, settings.worker_idle),
            correlation: Mutex::new(Correlation::default()),
        }
    }

    /// Builds a socket-backed engine from resolved configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(Arc::new(SocketTransport::new()), EngineSettings::from(config))
    }

    /// Process-wide engine over the socket transport with default settings.
    ///
    /// Statics are never dropped; hosts wanting teardown at exit hold an
    /// [`EngineGuard`] for the lifetime of their main function.
    #[must_use]
    pub fn global() -> &'static Self {
        &GLOBAL
    }

    /// Settings the engine was built with.
    #[must_use]
    pub const fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Sends `order` to `address` on the calling thread and returns the
    /// finished dialogue.
    ///
    /// Blocks for at most the connection's timeout. Failures leave the
    /// failure marker in the response and no receive time.
    pub fn submit_sync(&self, address: &str, order: &str) -> Dialogue {
        let mut dialogue = Dialogue::new(address, order);
        self.invoker.invoke(&mut dialogue);
        if dialogue.is_failed() {
            warn!(
                target: DISPATCH_TARGET,
                address,
                submitted = dialogue.time_submitted().as_micros(),
                "synchronous send failed"
            );
        }
        dialogue
    }

    /// Queues `order` for `address` and returns its submission time as a
    /// token.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::SpawnWorker`] when no worker was running and
    /// none could be started. The dialogue stays queued and is processed
    /// once a later submission starts a worker.
    pub fn submit_async(&self, address: &str, order: &str) -> Result<Timestamp, DispatchError> {
        let dialogue = Dialogue::new(address, order);
        let token = dialogue.time_submitted();
        {
            let mut correlation = self.correlation();
            correlation.submitted += 1;
            correlation.last_submitted = Some(token);
        }
        self.pending.push(dialogue);

        let spawned = self.pool.ensure_running(&self.worker_context())?;
        if spawned > 0 {
            debug!(target: DISPATCH_TARGET, spawned, "workers started");
        }
        Ok(token)
    }

    /// Drains the completed queue.
    ///
    /// With `wait_for_drain`, first blocks until every asynchronous
    /// submission made before the call has completed, or until no worker is
    /// left to complete it. Without it, returns whatever has completed so
    /// far, possibly nothing.
    pub fn retrieve_completed(&self, wait_for_drain: bool) -> Vec<Dialogue> {
        if wait_for_drain {
            let target = self.correlation().submitted;
            if self.completed.pushed() < target {
                let drained = self.completed.wait_for_pushed(
                    target,
                    self.settings.drain_poll,
                    None,
                    || self.pool.active_count() > 0,
                );
                if !drained {
                    warn!(
                        target: DISPATCH_TARGET,
                        outstanding = target.saturating_sub(self.completed.pushed()),
                        "no worker left to finish outstanding submissions"
                    );
                }
            }
        }

        // Workers finish out of order when several run, or when a stopping
        // worker and its replacement overlap.
        let mut batch = self.completed.drain();
        batch.sort_by_key(Dialogue::sequence);
        if let Some(last) = batch.last() {
            self.correlation().last_fetched = Some(last.time_submitted());
        }
        batch
    }

    /// Signals every worker to stop after its current dialogue. Does not
    /// wait.
    pub fn request_stop(&self) {
        let signalled = self.pool.request_stop();
        self.pending.wake_waiters();
        debug!(target: DISPATCH_TARGET, signalled, "stop requested");
    }

    /// Stops the workers, waits for them to exit, closes every cached
    /// connection and releases transport resources.
    ///
    /// Safe to call repeatedly and concurrently with submissions. While it
    /// runs no worker is started; dialogues submitted meanwhile stay pending
    /// and are processed once a later submission starts a worker. The engine
    /// remains usable: connections and workers are recreated on demand.
    pub fn shutdown(&self) {
        let pause = self.pool.pause();
        self.pending.wake_waiters();
        self.pool.wait_until_idle(self.settings.shutdown_poll);
        let closed = self.registry.close_all();
        self.transport.terminate();
        drop(pause);
        self.reporter.shutdown_completed(closed);
    }

    /// Overrides the reply timeout for `address`.
    ///
    /// # Errors
    ///
    /// Returns the transport error when no connection can be opened for
    /// `address`.
    pub fn set_timeout(&self, address: &str, timeout: Duration) -> Result<(), TransportError> {
        self.registry.set_timeout(address, timeout)
    }

    /// Connection registry of this engine.
    #[must_use]
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Workers still in the active set, stopping ones included.
    #[must_use]
    pub fn active_workers(&self) -> usize {
        self.pool.active_count()
    }

    /// Dialogues waiting for a worker.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Dialogues completed and not yet retrieved.
    #[must_use]
    pub fn completed_len(&self) -> usize {
        self.completed.len()
    }

    /// Token of the most recent asynchronous submission.
    #[must_use]
    pub fn last_submitted(&self) -> Option<Timestamp> {
        self.correlation().last_submitted
    }

    /// Submission time of the newest dialogue handed out by a retrieval.
    #[must_use]
    pub fn last_fetched(&self) -> Option<Timestamp> {
        self.correlation().last_fetched
    }

    fn worker_context(&self) -> WorkerContext {
        WorkerContext {
            pending: Arc::clone(&self.pending),
            completed: Arc::clone(&self.completed),
            invoker: Arc::clone(&self.invoker),
            reporter: Arc::clone(&self.reporter),
        }
    }

    fn correlation(&self) -> MutexGuard<'_, Correlation> {
        self.correlation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Engine")
            .field("settings", &self.settings)
            .field("registry", &self.registry)
            .field("pending", &self.pending.len())
            .field("completed", &self.completed.len())
            .field("workers", &self.pool.active_count())
            .finish_non_exhaustive()
    }
}

/// Shuts the borrowed engine down when dropped.
#[derive(Debug)]
pub struct EngineGuard<'a> {
    engine: &'a Engine,
}

impl<'a> EngineGuard<'a> {
    /// Guards `engine`.
    #[must_use]
    pub const fn new(engine: &'a Engine) -> Self {
        Self { engine }
    }

    /// Guards the process-wide engine.
    #[must_use]
    pub fn global() -> EngineGuard<'static> {
        EngineGuard::new(Engine::global())
    }

    /// Guarded engine.
    #[must_use]
    pub const fn engine(&self) -> &'a Engine {
        self.engine
    }
}

impl Drop for EngineGuard<'_> {
    fn drop(&mut self) {
        self.engine.shutdown();
    }
}
