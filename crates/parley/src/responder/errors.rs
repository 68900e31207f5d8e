//! Errors raised while binding or running the reply server.

use std::io;
use std::net::SocketAddr;

use parley_config::EndpointPreparationError;
use thiserror::Error;

/// Failures binding, starting or joining a [`ReplyServer`](super::ReplyServer).
#[derive(Debug, Error)]
pub enum ListenerError {
    /// The socket's parent directory could not be prepared.
    #[error(transparent)]
    Prepare(#[from] EndpointPreparationError),
    /// Host name resolution failed.
    #[error("failed to resolve TCP address {host}:{port}: {source}")]
    Resolve {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },
    /// Resolution succeeded but produced no address.
    #[error("no TCP addresses resolved for {host}:{port}")]
    ResolveEmpty { host: String, port: u16 },
    /// Binding the TCP listener failed.
    #[error("failed to bind TCP listener at {addr}: {source}")]
    BindTcp {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    /// The listener could not be switched to non-blocking accepts.
    #[error("failed to enable non-blocking listener: {source}")]
    NonBlocking {
        #[source]
        source: io::Error,
    },
    /// The accept thread could not be spawned.
    #[error("failed to spawn accept thread: {source}")]
    Spawn {
        #[source]
        source: io::Error,
    },
    /// Unix sockets were requested on a platform without them.
    #[cfg(not(unix))]
    #[error("unix sockets are unsupported for endpoint {endpoint}")]
    UnsupportedUnix { endpoint: String },
    /// Binding the Unix listener failed.
    #[cfg(unix)]
    #[error("failed to bind unix listener at {path}: {source}")]
    BindUnix {
        path: String,
        #[source]
        source: io::Error,
    },
    /// Another live server owns the socket path.
    #[cfg(unix)]
    #[error("unix socket {path} is already in use")]
    UnixInUse { path: String },
    /// A non-socket file occupies the socket path.
    #[cfg(unix)]
    #[error("{path} exists and is not a unix socket")]
    UnixNotSocket { path: String },
    /// Removing a stale socket file failed.
    #[cfg(unix)]
    #[error("failed to remove stale unix socket {path}: {source}")]
    UnixCleanup {
        path: String,
        #[source]
        source: io::Error,
    },
    /// The accept thread panicked.
    #[error("reply server thread panicked")]
    ThreadPanic,
}
