//! Error types for transport operations.

use std::io;

use parley_config::EndpointParseError;
use thiserror::Error;

use super::frame::FrameError;

/// Failures reported by a [`Transport`](super::Transport) or
/// [`Connection`](super::Connection).
///
/// None of these escape the engine as hard errors: the invoker folds them
/// into the failed outcome of the dialogue concerned.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The address is not a recognised endpoint URL.
    #[error("invalid address {address}: {source}")]
    InvalidAddress {
        address: String,
        #[source]
        source: EndpointParseError,
    },
    /// No socket address could be resolved for a TCP endpoint.
    #[error("failed to resolve {endpoint}: {source}")]
    Resolve {
        endpoint: String,
        #[source]
        source: io::Error,
    },
    /// Connecting to the endpoint failed.
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: io::Error,
    },
    /// Writing a frame failed.
    #[error("failed to send frame: {source}")]
    Send {
        #[source]
        source: io::Error,
    },
    /// Writing a frame did not finish in time.
    #[error("timed out sending frame")]
    SendTimeout,
    /// Reading failed for a reason other than "would block".
    #[error("failed to receive frame: {source}")]
    Receive {
        #[source]
        source: io::Error,
    },
    /// The peer closed the connection.
    #[error("connection closed by peer")]
    Closed,
    /// The connection has not been established.
    #[error("connection is not established")]
    NotConnected,
    /// A frame could not be encoded or decoded.
    #[error(transparent)]
    Frame(#[from] FrameError),
    /// Unix sockets were requested on a platform without them.
    #[cfg(not(unix))]
    #[error("unix sockets are unsupported for endpoint {endpoint}")]
    UnsupportedUnix { endpoint: String },
}
