//! Background workers draining the pending queue.
//!
//! A worker loops while its running flag is set: take one dialogue (waiting
//! up to the idle interval), invoke it, push it to the completed queue. The
//! flag is checked under the pending queue's lock before a dialogue is
//! taken, so a stopped worker never starts another exchange, while an
//! exchange in progress always finishes before the worker exits. On exit the
//! worker removes its own descriptor from the active set.
//!
//! While a [`PoolPause`] is held no worker is started, which lets shutdown
//! wait for the active set to empty without racing new submissions.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info};

use crate::invoker::Invoker;
use crate::queue::DialogueQueue;
use crate::reporter::Reporter;

const WORKER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::worker");

/// Errors raised while starting workers.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The operating system refused to create a worker thread.
    #[error("failed to spawn worker {worker}: {source}")]
    Spawn {
        /// Identifier the worker would have had.
        worker: usize,
        #[source]
        source: std::io::Error,
    },
}

/// Control block of one worker.
#[derive(Debug)]
pub struct WorkerDescriptor {
    id: usize,
    running: AtomicBool,
    idle: Duration,
}

impl WorkerDescriptor {
    /// Identifier, unique within the pool.
    #[must_use]
    pub const fn id(&self) -> usize {
        self.id
    }

    /// Whether the worker will start another iteration.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Interval the worker waits for work before re-checking its flag.
    #[must_use]
    pub const fn idle_interval(&self) -> Duration {
        self.idle
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Everything a worker needs to process dialogues.
#[derive(Clone)]
pub struct WorkerContext {
    /// Source of dialogues.
    pub pending: Arc<DialogueQueue>,
    /// Destination of finished dialogues.
    pub completed: Arc<DialogueQueue>,
    /// Performs the exchanges.
    pub invoker: Arc<Invoker>,
    /// Receives lifecycle events.
    pub reporter: Arc<dyn Reporter>,
}

#[derive(Debug, Default)]
struct PoolState {
    workers: Vec<Arc<WorkerDescriptor>>,
    pauses: usize,
}

impl PoolState {
    fn stop_all(&self) -> usize {
        for worker in &self.workers {
            worker.stop();
        }
        self.workers.len()
    }
}

#[derive(Debug, Default)]
struct PoolShared {
    state: Mutex<PoolState>,
    retired: Condvar,
    next_id: AtomicUsize,
}

impl PoolShared {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn retire(&self, descriptor: &Arc<WorkerDescriptor>) {
        self.lock()
            .workers
            .retain(|active| !Arc::ptr_eq(active, descriptor));
        self.retired.notify_all();
    }
}

/// Set of active workers with a configurable size.
#[derive(Debug)]
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    size: usize,
    idle: Duration,
}

impl WorkerPool {
    /// Builds an empty pool that starts `size` workers at a time.
    #[must_use]
    pub fn new(size: usize, idle: Duration) -> Self {
        Self {
            shared: Arc::new(PoolShared::default()),
            size: size.max(1),
            idle,
        }
    }

    /// Starts the configured number of workers when none is running.
    ///
    /// Workers that were asked to stop but have not exited yet do not count
    /// as running. Nothing is started while the pool is paused. Returns the
    /// number of workers spawned.
    pub fn ensure_running(&self, context: &WorkerContext) -> Result<usize, WorkerError> {
        let mut state = self.shared.lock();
        if state.pauses > 0 || state.workers.iter().any(|worker| worker.is_running()) {
            return Ok(0);
        }

        for _ in 0..self.size {
            let descriptor = Arc::new(WorkerDescriptor {
                id: self.shared.next_id.fetch_add(1, Ordering::Relaxed),
                running: AtomicBool::new(true),
                idle: self.idle,
            });
            state.workers.push(Arc::clone(&descriptor));
            if let Err(source) = spawn(&self.shared, &descriptor, context.clone()) {
                state.workers.retain(|worker| !Arc::ptr_eq(worker, &descriptor));
                return Err(WorkerError::Spawn {
                    worker: descriptor.id,
                    source,
                });
            }
        }
        Ok(self.size)
    }

    /// Clears every worker's running flag without waiting. Returns the number
    /// of workers signalled.
    pub fn request_stop(&self) -> usize {
        self.shared.lock().stop_all()
    }

    /// Stops every worker and keeps new ones from starting until the
    /// returned guard is dropped.
    #[must_use = "the pool resumes as soon as the guard is dropped"]
    pub fn pause(&self) -> PoolPause<'_> {
        let mut state = self.shared.lock();
        state.pauses += 1;
        let signalled = state.stop_all();
        drop(state);
        debug!(target: WORKER_TARGET, signalled, "worker pool paused");
        PoolPause { pool: self }
    }

    /// Blocks until every worker has left the active set, re-checking at
    /// least every `poll`.
    ///
    /// Workers found running on a re-check are stopped again, so the wait
    /// ends even when a submission started a worker after the last stop
    /// request.
    pub fn wait_until_idle(&self, poll: Duration) {
        let mut state = self.shared.lock();
        while !state.workers.is_empty() {
            state.stop_all();
            state = self
                .shared
                .retired
                .wait_timeout(state, poll)
                .map_or_else(|poison| poison.into_inner().0, |(guard, _)| guard);
        }
    }

    /// Whether a [`PoolPause`] is currently held.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.shared.lock().pauses > 0
    }

    /// Number of workers still in the active set, stopping ones included.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.shared.lock().workers.len()
    }

    /// Number of workers whose running flag is set.
    #[must_use]
    pub fn running_count(&self) -> usize {
        self.shared
            .lock()
            .workers
            .iter()
            .filter(|worker| worker.is_running())
            .count()
    }

    /// True when no worker is in the active set.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.shared.lock().workers.is_empty()
    }
}

/// Keeps a [`WorkerPool`] from starting workers while alive.
#[derive(Debug)]
pub struct PoolPause<'a> {
    pool: &'a WorkerPool,
}

impl Drop for PoolPause<'_> {
    fn drop(&mut self) {
        let mut state = self.pool.shared.lock();
        state.pauses = state.pauses.saturating_sub(1);
    }
}

fn spawn(
    shared: &Arc<PoolShared>,
    descriptor: &Arc<WorkerDescriptor>,
    context: WorkerContext,
) -> std::io::Result<()> {
    let shared = Arc::clone(shared);
    let descriptor = Arc::clone(descriptor);
    thread::Builder::new()
        .name(format!("parley-worker-{}", descriptor.id))
        .spawn(move || run_worker(&shared, &descriptor, &context))
        .map(drop)
}

/// Removes the descriptor from the active set on every exit path.
struct Retirement<'a> {
    shared: &'a PoolShared,
    descriptor: &'a Arc<WorkerDescriptor>,
    reporter: &'a dyn Reporter,
}

impl Drop for Retirement<'_> {
    fn drop(&mut self) {
        self.descriptor.stop();
        self.shared.retire(self.descriptor);
        self.reporter.worker_stopped(self.descriptor.id);
    }
}

fn run_worker(shared: &PoolShared, descriptor: &Arc<WorkerDescriptor>, context: &WorkerContext) {
    let _retirement = Retirement {
        shared,
        descriptor,
        reporter: context.reporter.as_ref(),
    };
    context.reporter.worker_started(descriptor.id);

    let mut processed = 0_u64;
    while descriptor.is_running() {
        let next = context
            .pending
            .pop_front_timeout_while(descriptor.idle, || descriptor.is_running());
        let Some(mut dialogue) = next else {
            continue;
        };
        context.invoker.invoke(&mut dialogue);
        context.completed.push(dialogue);
        processed += 1;
    }

    info!(
        target: WORKER_TARGET,
        worker = descriptor.id,
        processed,
        "worker leaving loop"
    );
}
