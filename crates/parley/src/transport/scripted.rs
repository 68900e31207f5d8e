//! In-memory transport whose peers follow a per-address script.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use super::{Connection, Transport, TransportError};

/// How the scripted peer at an address behaves.
#[derive(Debug, Clone)]
pub(crate) enum PeerScript {
    /// Replies with the order prefixed by `prefix` after `delay`.
    Echo { prefix: String, delay: Duration },
    /// Replies with a fixed payload after `delay`.
    Reply { payload: Vec<u8>, delay: Duration },
    /// Never replies.
    Silent,
    /// Rejects every send.
    Refuse,
}

#[derive(Debug, Default)]
struct Shared {
    scripts: HashMap<String, PeerScript>,
    opened: Vec<String>,
    lingers: Vec<Duration>,
    sent: Vec<(String, Vec<u8>)>,
    closed: usize,
    resets: usize,
}

/// Transport double recording every interaction.
#[derive(Debug, Clone, Default)]
pub(crate) struct ScriptedTransport {
    shared: Arc<Mutex<Shared>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    terminated: Arc<AtomicUsize>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn script(&self, address: &str, script: PeerScript) -> &Self {
        self.lock().scripts.insert(address.to_owned(), script);
        self
    }

    pub(crate) fn opened(&self) -> Vec<String> {
        self.lock().opened.clone()
    }

    pub(crate) fn lingers(&self) -> Vec<Duration> {
        self.lock().lingers.clone()
    }

    pub(crate) fn sent(&self) -> Vec<(String, Vec<u8>)> {
        self.lock().sent.clone()
    }

    pub(crate) fn closed(&self) -> usize {
        self.lock().closed
    }

    pub(crate) fn resets(&self) -> usize {
        self.lock().resets
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn terminations(&self) -> usize {
        self.terminated.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Transport for ScriptedTransport {
    fn open(&self, address: &str) -> Result<Box<dyn Connection>, TransportError> {
        let mut shared = self.lock();
        shared.opened.push(address.to_owned());
        let script = shared
            .scripts
            .get(address)
            .cloned()
            .unwrap_or(PeerScript::Silent);
        Ok(Box::new(ScriptedConnection {
            address: address.to_owned(),
            script,
            transport: self.clone(),
            pending: None,
            outstanding: false,
        }))
    }

    fn terminate(&self) {
        self.terminated.fetch_add(1, Ordering::SeqCst);
    }
}

struct ScriptedConnection {
    address: String,
    script: PeerScript,
    transport: ScriptedTransport,
    pending: Option<(Instant, Vec<u8>)>,
    outstanding: bool,
}

impl ScriptedConnection {
    fn begin(&mut self) {
        self.outstanding = true;
        let now = self.transport.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.transport.max_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    fn finish(&mut self) {
        if self.outstanding {
            self.outstanding = false;
            self.transport.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Connection for ScriptedConnection {
    fn set_linger(&mut self, linger: Duration) {
        self.transport.lock().lingers.push(linger);
    }

    fn send(&mut self, frame: &[u8], _timeout: Duration) -> Result<(), TransportError> {
        self.transport
            .lock()
            .sent
            .push((self.address.clone(), frame.to_vec()));
        let now = Instant::now();
        self.pending = match &self.script {
            PeerScript::Echo { prefix, delay } => {
                Some((now + *delay, [prefix.as_bytes(), frame].concat()))
            }
            PeerScript::Reply { payload, delay } => Some((now + *delay, payload.clone())),
            PeerScript::Silent => None,
            PeerScript::Refuse => return Err(TransportError::Closed),
        };
        self.begin();
        Ok(())
    }

    fn try_recv(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        match self.pending.take() {
            Some((ready_at, payload)) if Instant::now() >= ready_at => {
                self.finish();
                Ok(Some(payload))
            }
            other => {
                self.pending = other;
                Ok(None)
            }
        }
    }

    fn reset(&mut self) {
        self.pending = None;
        self.finish();
        self.transport.lock().resets += 1;
    }

    fn close(&mut self) {
        self.finish();
        self.transport.lock().closed += 1;
    }
}
