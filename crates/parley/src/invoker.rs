//! One send-then-receive cycle per dialogue.
//!
//! Request/reply connections permit a single outstanding request, so the send
//! and the whole polling receive run as one unit under the exclusivity lock.
//! The lock is shared by every connection of the engine: at most one cycle is
//! in flight at any instant, whatever the number of addresses in use.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::trace;

use crate::clock::Timestamp;
use crate::dialogue::Dialogue;
use crate::registry::ConnectionRegistry;
use crate::reporter::Reporter;
use crate::transport::{Connection, TransportError};

const INVOKER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::invoker");

/// Why a dialogue ended without a reply.
#[derive(Debug)]
pub enum InvocationFailure {
    /// No reply arrived within the connection's timeout.
    Timeout {
        /// Timeout in force for the cycle.
        timeout: Duration,
    },
    /// Opening, sending or receiving failed.
    Transport(TransportError),
}

impl fmt::Display for InvocationFailure {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout { timeout } => {
                write!(formatter, "no reply within {}ms", timeout.as_millis())
            }
            Self::Transport(error) => write!(formatter, "{error}"),
        }
    }
}

/// Performs exchanges on behalf of workers and synchronous callers.
pub struct Invoker {
    registry: Arc<ConnectionRegistry>,
    reporter: Arc<dyn Reporter>,
    exclusivity: Mutex<()>,
}

impl Invoker {
    /// Builds an invoker over `registry`.
    #[must_use]
    pub fn new(registry: Arc<ConnectionRegistry>, reporter: Arc<dyn Reporter>) -> Self {
        Self {
            registry,
            reporter,
            exclusivity: Mutex::new(()),
        }
    }

    /// Registry the invoker resolves addresses through.
    #[must_use]
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Sends the dialogue's order and records the outcome on the dialogue.
    ///
    /// Never fails: a timeout or transport error leaves the failure marker in
    /// the response and no receive time.
    pub fn invoke(&self, dialogue: &mut Dialogue) {
        let entry = match self.registry.get_or_create(dialogue.address()) {
            Ok(entry) => entry,
            Err(error) => {
                dialogue.fail();
                self.reporter
                    .dialogue_failed(dialogue, &InvocationFailure::Transport(error));
                return;
            }
        };
        let timeout = entry.timeout();

        let outcome = {
            let _cycle = self
                .exclusivity
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let mut connection = entry.connection();
            exchange(&mut **connection, dialogue, timeout)
        };

        match outcome {
            Ok((reply, received)) => {
                trace!(
                    target: INVOKER_TARGET,
                    address = dialogue.address(),
                    bytes = reply.len(),
                    "reply received"
                );
                dialogue.complete(&reply, received);
            }
            Err(failure) => {
                dialogue.fail();
                self.reporter.dialogue_failed(dialogue, &failure);
            }
        }
    }
}

impl fmt::Debug for Invoker {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Invoker")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

fn exchange(
    connection: &mut dyn Connection,
    dialogue: &mut Dialogue,
    timeout: Duration,
) -> Result<(Vec<u8>, Timestamp), InvocationFailure> {
    let sent = connection.send(dialogue.order().as_bytes(), timeout);
    let started = Instant::now();
    dialogue.mark_sent();
    if let Err(error) = sent {
        connection.reset();
        return Err(InvocationFailure::Transport(error));
    }

    loop {
        match connection.try_recv() {
            Ok(Some(reply)) => return Ok((reply, Timestamp::now())),
            Ok(None) if started.elapsed() > timeout => {
                connection.reset();
                return Err(InvocationFailure::Timeout { timeout });
            }
            Ok(None) => thread::yield_now(),
            Err(error) => {
                connection.reset();
                return Err(InvocationFailure::Transport(error));
            }
        }
    }
}
