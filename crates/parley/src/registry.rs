//! Lazily populated cache of connections keyed by address.
//!
//! Entries are created on first use and live until [`ConnectionRegistry::close_all`];
//! there is never more than one entry per address in between, so repeated
//! dialogues to the same address reuse the identical connection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::debug;

use crate::reporter::Reporter;
use crate::transport::{Connection, Transport, TransportError};

const REGISTRY_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::registry");

/// A cached connection and its reply timeout.
pub struct ConnectionEntry {
    address: String,
    timeout_micros: AtomicU64,
    connection: Mutex<Box<dyn Connection>>,
}

impl ConnectionEntry {
    fn new(address: &str, connection: Box<dyn Connection>, timeout: Duration) -> Self {
        Self {
            address: address.to_owned(),
            timeout_micros: AtomicU64::new(duration_micros(timeout)),
            connection: Mutex::new(connection),
        }
    }

    /// Address the entry was created for.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Time a dialogue on this connection waits for its reply.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_micros(self.timeout_micros.load(Ordering::Acquire))
    }

    /// Replaces the reply timeout; applies from the next dialogue on.
    pub fn set_timeout(&self, timeout: Duration) {
        self.timeout_micros
            .store(duration_micros(timeout), Ordering::Release);
    }

    pub(crate) fn connection(&self) -> MutexGuard<'_, Box<dyn Connection>> {
        self.connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ConnectionEntry {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ConnectionEntry")
            .field("address", &self.address)
            .field("timeout", &self.timeout())
            .finish_non_exhaustive()
    }
}

fn duration_micros(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

/// Address → connection cache shared by workers and synchronous callers.
pub struct ConnectionRegistry {
    transport: Arc<dyn Transport>,
    default_timeout: Duration,
    reporter: Arc<dyn Reporter>,
    entries: Mutex<HashMap<String, Arc<ConnectionEntry>>>,
}

impl ConnectionRegistry {
    /// Builds an empty registry over `transport`.
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        default_timeout: Duration,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        Self {
            transport,
            default_timeout,
            reporter,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the entry for `address`, opening and caching it on first use.
    ///
    /// New connections get immediate teardown (zero linger) and the default
    /// timeout. Open failures are reported and not cached, so the next call
    /// tries again.
    pub fn get_or_create(&self, address: &str) -> Result<Arc<ConnectionEntry>, TransportError> {
        let mut entries = self.lock();
        if let Some(entry) = entries.get(address) {
            return Ok(Arc::clone(entry));
        }

        let mut connection = match self.transport.open(address) {
            Ok(connection) => connection,
            Err(error) => {
                self.reporter.connection_failed(address, &error);
                return Err(error);
            }
        };
        connection.set_linger(Duration::ZERO);
        let entry = Arc::new(ConnectionEntry::new(
            address,
            connection,
            self.default_timeout,
        ));
        entries.insert(address.to_owned(), Arc::clone(&entry));
        drop(entries);

        self.reporter.connection_opened(address);
        Ok(entry)
    }

    /// Sets the reply timeout for `address`, creating its entry if needed.
    pub fn set_timeout(&self, address: &str, timeout: Duration) -> Result<(), TransportError> {
        self.get_or_create(address)?.set_timeout(timeout);
        Ok(())
    }

    /// Returns the cached entry for `address` without creating one.
    #[must_use]
    pub fn get(&self, address: &str) -> Option<Arc<ConnectionEntry>> {
        self.lock().get(address).cloned()
    }

    /// Number of cached connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True when no connection is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Closes every cached connection with immediate teardown and empties the
    /// cache. Returns the number of connections closed.
    pub fn close_all(&self) -> usize {
        let drained = self.lock().drain().collect::<Vec<_>>();
        let count = drained.len();
        for (address, entry) in drained {
            let mut connection = entry.connection();
            connection.set_linger(Duration::ZERO);
            connection.close();
            debug!(target: REGISTRY_TARGET, address = %address, "connection closed");
        }
        count
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<ConnectionEntry>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ConnectionRegistry")
            .field("default_timeout", &self.default_timeout)
            .field("entries", &self.len())
            .finish_non_exhaustive()
    }
}
