//! Transport capability consumed by the engine.
//!
//! The engine only needs four things from a transport: open a connection to
//! an address, send one frame, poll for one frame without blocking, and tear
//! a connection down. [`SocketTransport`] provides them over TCP and Unix
//! domain sockets using length-prefixed frames.

mod errors;
pub mod frame;
mod socket;
pub(crate) mod stream;

#[cfg(test)]
pub(crate) mod scripted;

use std::time::Duration;

pub use self::errors::TransportError;
pub use self::frame::FrameError;
pub use self::socket::{SocketConnection, SocketTransport};

/// Factory for request/reply connections.
pub trait Transport: Send + Sync {
    /// Opens a request/reply connection to `address`.
    ///
    /// Implementations may defer the actual network connect until the first
    /// send, mirroring transports whose connect is asynchronous.
    fn open(&self, address: &str) -> Result<Box<dyn Connection>, TransportError>;

    /// Releases transport-wide resources once every connection is closed.
    fn terminate(&self) {}
}

/// One request/reply connection.
///
/// At most one request may be outstanding on a connection; the caller is
/// responsible for never sending again before the reply was received or the
/// connection was [`reset`](Connection::reset).
pub trait Connection: Send {
    /// Sets how long unsent data may linger when the connection is closed.
    fn set_linger(&mut self, linger: Duration);

    /// Sends `frame` as one message, taking at most `timeout`.
    fn send(&mut self, frame: &[u8], timeout: Duration) -> Result<(), TransportError>;

    /// Returns the next complete frame, or `Ok(None)` when none is available
    /// yet.
    fn try_recv(&mut self) -> Result<Option<Vec<u8>>, TransportError>;

    /// Discards the connection state after a failed exchange so a late reply
    /// can never be paired with a later request.
    fn reset(&mut self);

    /// Closes the connection honouring the configured linger.
    fn close(&mut self);
}
