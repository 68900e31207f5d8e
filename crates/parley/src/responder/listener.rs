//! Accept loop and per-connection frame serving.

use std::io::{self, Read};
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parley_config::SocketEndpoint;
use tracing::{debug, info, warn};

use super::{ListenerError, RESPONDER_TARGET, ReplyHandler};
use crate::transport::frame::{self, FrameDecoder};
use crate::transport::stream::Stream;

#[cfg(unix)]
use std::fs;
#[cfg(unix)]
use std::os::unix::fs::FileTypeExt;
#[cfg(unix)]
use std::os::unix::net::{UnixListener, UnixStream};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(5);
const ERROR_BACKOFF: Duration = Duration::from_millis(100);
const READ_TICK: Duration = Duration::from_millis(20);
const READ_CHUNK: usize = 8 * 1024;

#[derive(Debug)]
enum Acceptor {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

impl Acceptor {
    fn set_nonblocking(&self) -> io::Result<()> {
        match self {
            Self::Tcp(listener) => listener.set_nonblocking(true),
            #[cfg(unix)]
            Self::Unix(listener) => listener.set_nonblocking(true),
        }
    }

    fn accept(&self) -> io::Result<Option<Stream>> {
        let accepted = match self {
            Self::Tcp(listener) => listener.accept().and_then(|(stream, _)| {
                // Replies are small frames; do not let Nagle hold them back.
                stream.set_nodelay(true)?;
                Ok(Stream::Tcp(stream))
            }),
            #[cfg(unix)]
            Self::Unix(listener) => listener.accept().map(|(stream, _)| Stream::Unix(stream)),
        };
        match accepted {
            Ok(stream) => {
                stream.set_nonblocking(false)?;
                Ok(Some(stream))
            }
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(error) => Err(error),
        }
    }
}

/// A bound, not yet serving, reply server.
#[derive(Debug)]
pub struct ReplyServer {
    endpoint: SocketEndpoint,
    acceptor: Acceptor,
}

impl ReplyServer {
    /// Binds to `endpoint`.
    ///
    /// A TCP host of `*` binds every IPv4 interface. For Unix endpoints the
    /// parent directory is created and a stale socket file left by a dead
    /// server is removed.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError`] when the endpoint cannot be bound.
    pub fn bind(endpoint: &SocketEndpoint) -> Result<Self, ListenerError> {
        endpoint.prepare_filesystem()?;
        let acceptor = match endpoint {
            SocketEndpoint::Tcp { port, .. } => {
                Acceptor::Tcp(bind_tcp(endpoint.bind_host().unwrap_or_default(), *port)?)
            }
            #[cfg(unix)]
            SocketEndpoint::Unix { path } => Acceptor::Unix(bind_unix(path.as_str())?),
            #[cfg(not(unix))]
            SocketEndpoint::Unix { .. } => {
                return Err(ListenerError::UnsupportedUnix {
                    endpoint: endpoint.to_string(),
                });
            }
        };
        Ok(Self {
            endpoint: endpoint.clone(),
            acceptor,
        })
    }

    /// Address of a TCP server; `None` for Unix sockets.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.acceptor {
            Acceptor::Tcp(listener) => listener.local_addr().ok(),
            #[cfg(unix)]
            Acceptor::Unix(_) => None,
        }
    }

    /// Endpoint clients should connect to.
    ///
    /// For TCP this reflects the port actually bound, so binding port 0
    /// yields a usable address.
    #[must_use]
    pub fn endpoint(&self) -> SocketEndpoint {
        match (&self.endpoint, self.local_addr()) {
            (SocketEndpoint::Tcp { .. }, Some(addr)) => {
                let host = if addr.ip().is_unspecified() {
                    "127.0.0.1".to_owned()
                } else {
                    addr.ip().to_string()
                };
                SocketEndpoint::tcp(host, addr.port())
            }
            (endpoint, _) => endpoint.clone(),
        }
    }

    /// Starts serving in a background thread.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError`] when the listener cannot be made
    /// non-blocking or the accept thread cannot be spawned.
    pub fn start(self, handler: Arc<dyn ReplyHandler>) -> Result<ServerHandle, ListenerError> {
        if let Err(source) = self.acceptor.set_nonblocking() {
            remove_socket_file(&self.endpoint);
            return Err(ListenerError::NonBlocking { source });
        }
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown);
        let handle = thread::Builder::new()
            .name("parley-responder".to_owned())
            .spawn(move || serve(&self, &flag, &handler))
            .map_err(|source| ListenerError::Spawn { source })?;
        Ok(ServerHandle {
            shutdown,
            handle: Some(handle),
        })
    }
}

/// Control handle of a running [`ReplyServer`].
#[derive(Debug)]
pub struct ServerHandle {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ServerHandle {
    /// Asks the server to stop accepting and close its connections.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Waits for the accept thread and its connection threads to finish.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError::ThreadPanic`] when the accept thread
    /// panicked.
    pub fn join(mut self) -> Result<(), ListenerError> {
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| ListenerError::ThreadPanic),
            None => Ok(()),
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn serve(server: &ReplyServer, shutdown: &Arc<AtomicBool>, handler: &Arc<dyn ReplyHandler>) {
    info!(
        target: RESPONDER_TARGET,
        endpoint = %server.endpoint,
        "reply server listening"
    );
    let mut connections = Vec::<JoinHandle<()>>::new();
    let mut last_error = None::<io::ErrorKind>;
    while !shutdown.load(Ordering::SeqCst) {
        match server.acceptor.accept() {
            Ok(Some(stream)) => {
                last_error = None;
                connections.retain(|connection| !connection.is_finished());
                let shutdown = Arc::clone(shutdown);
                let handler = Arc::clone(handler);
                let spawned = thread::Builder::new()
                    .name("parley-responder-conn".to_owned())
                    .spawn(move || answer(stream, &shutdown, handler.as_ref()));
                match spawned {
                    Ok(connection) => connections.push(connection),
                    Err(error) => warn!(
                        target: RESPONDER_TARGET,
                        error = %error,
                        "dropping connection, no thread available"
                    ),
                }
            }
            Ok(None) => thread::sleep(ACCEPT_BACKOFF),
            Err(error) => {
                if last_error != Some(error.kind()) {
                    warn!(target: RESPONDER_TARGET, error = %error, "accept failed");
                }
                last_error = Some(error.kind());
                thread::sleep(ERROR_BACKOFF);
            }
        }
    }

    for connection in connections {
        if connection.join().is_err() {
            warn!(target: RESPONDER_TARGET, "connection thread panicked");
        }
    }
    remove_socket_file(&server.endpoint);
    info!(
        target: RESPONDER_TARGET,
        endpoint = %server.endpoint,
        "reply server stopped"
    );
}

/// Serves one connection until the peer leaves, a frame is malformed or the
/// server shuts down.
fn answer(mut stream: Stream, shutdown: &AtomicBool, handler: &dyn ReplyHandler) {
    if let Err(error) = stream.set_read_timeout(Some(READ_TICK)) {
        warn!(target: RESPONDER_TARGET, error = %error, "cannot set read timeout");
        return;
    }
    let mut decoder = FrameDecoder::new();
    let mut chunk = vec![0_u8; READ_CHUNK];
    while !shutdown.load(Ordering::SeqCst) {
        let read = match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(read) => read,
            Err(error)
                if matches!(
                    error.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                continue;
            }
            Err(error) => {
                debug!(target: RESPONDER_TARGET, error = %error, "connection read failed");
                break;
            }
        };
        decoder.push(chunk.get(..read).unwrap_or_default());
        if let Err(error) = reply_to_buffered(&mut stream, &mut decoder, handler) {
            debug!(target: RESPONDER_TARGET, error = %error, "closing connection");
            break;
        }
    }
    if let Err(error) = stream.shutdown() {
        debug!(target: RESPONDER_TARGET, error = %error, "connection already closed");
    }
}

fn reply_to_buffered(
    stream: &mut Stream,
    decoder: &mut FrameDecoder,
    handler: &dyn ReplyHandler,
) -> io::Result<()> {
    while let Some(request) = decoder
        .next_frame()
        .map_err(|error| io::Error::new(io::ErrorKind::InvalidData, error))?
    {
        if let Some(reply) = handler.reply(&request) {
            frame::write_frame(stream, &reply)?;
        }
    }
    Ok(())
}

fn bind_tcp(host: &str, port: u16) -> Result<TcpListener, ListenerError> {
    let addr = (host, port)
        .to_socket_addrs()
        .map_err(|source| ListenerError::Resolve {
            host: host.to_owned(),
            port,
            source,
        })?
        .next()
        .ok_or_else(|| ListenerError::ResolveEmpty {
            host: host.to_owned(),
            port,
        })?;
    TcpListener::bind(addr).map_err(|source| ListenerError::BindTcp { addr, source })
}

#[cfg(unix)]
fn bind_unix(path: &str) -> Result<UnixListener, ListenerError> {
    if let Ok(metadata) = fs::symlink_metadata(path) {
        if !metadata.file_type().is_socket() {
            return Err(ListenerError::UnixNotSocket {
                path: path.to_owned(),
            });
        }
        if UnixStream::connect(path).is_ok() {
            return Err(ListenerError::UnixInUse {
                path: path.to_owned(),
            });
        }
        fs::remove_file(path).map_err(|source| ListenerError::UnixCleanup {
            path: path.to_owned(),
            source,
        })?;
    }
    UnixListener::bind(path).map_err(|source| ListenerError::BindUnix {
        path: path.to_owned(),
        source,
    })
}

fn remove_socket_file(endpoint: &SocketEndpoint) {
    #[cfg(unix)]
    {
        if let Some(path) = endpoint.unix_path()
            && let Err(error) = fs::remove_file(path)
            && error.kind() != io::ErrorKind::NotFound
        {
            warn!(
                target: RESPONDER_TARGET,
                error = %error,
                path = %path,
                "failed to remove unix socket file"
            );
        }
    }
    #[cfg(not(unix))]
    {
        let _ = endpoint;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::responder::{EchoHandler, FixedReplyHandler};
    use rstest::rstest;
    use std::net::TcpStream;

    fn exchange<S: io::Read + io::Write>(stream: &mut S, request: &[u8]) -> Option<Vec<u8>> {
        frame::write_frame(stream, request).expect("write request");
        frame::read_frame(stream).expect("read reply")
    }

    fn start_tcp(handler: Arc<dyn ReplyHandler>) -> (SocketAddr, ServerHandle) {
        let server = ReplyServer::bind(&SocketEndpoint::tcp("127.0.0.1", 0)).expect("bind");
        let addr = server.local_addr().expect("local address");
        (addr, server.start(handler).expect("start"))
    }

    #[rstest]
    fn echoes_each_frame_in_order() {
        let (addr, handle) = start_tcp(Arc::new(EchoHandler));
        let mut client = TcpStream::connect(addr).expect("connect");

        assert_eq!(exchange(&mut client, b"one"), Some(b"one".to_vec()));
        assert_eq!(exchange(&mut client, b"two"), Some(b"two".to_vec()));

        drop(client);
        handle.shutdown();
        handle.join().expect("join");
    }

    #[rstest]
    fn serves_several_clients() {
        let (addr, handle) = start_tcp(Arc::new(FixedReplyHandler::new("PONG")));
        let mut first = TcpStream::connect(addr).expect("connect first");
        let mut second = TcpStream::connect(addr).expect("connect second");

        assert_eq!(exchange(&mut second, b"PING"), Some(b"PONG".to_vec()));
        assert_eq!(exchange(&mut first, b"PING"), Some(b"PONG".to_vec()));

        handle.shutdown();
        handle.join().expect("join");
    }

    #[rstest]
    fn shutdown_closes_idle_connections() {
        let (addr, handle) = start_tcp(Arc::new(EchoHandler));
        let mut client = TcpStream::connect(addr).expect("connect");
        assert_eq!(exchange(&mut client, b"hello"), Some(b"hello".to_vec()));

        handle.shutdown();
        handle.join().expect("join");

        assert_eq!(frame::read_frame(&mut client).ok().flatten(), None);
    }

    #[test]
    fn endpoint_reports_the_bound_port() {
        let server = ReplyServer::bind(&SocketEndpoint::tcp("127.0.0.1", 0)).expect("bind");
        let addr = server.local_addr().expect("local address");
        assert_eq!(server.endpoint(), SocketEndpoint::tcp("127.0.0.1", addr.port()));
    }

    #[cfg(unix)]
    #[test]
    fn unix_server_replaces_stale_socket_and_cleans_up() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("parley.sock");
        drop(UnixListener::bind(&path).expect("bind stale listener"));
        assert!(path.exists());

        let endpoint = SocketEndpoint::unix(path.to_str().expect("utf8 path"));
        let handle = ReplyServer::bind(&endpoint)
            .expect("bind over stale socket")
            .start(Arc::new(EchoHandler))
            .expect("start");
        let mut client = UnixStream::connect(&path).expect("connect");
        assert_eq!(exchange(&mut client, b"ipc"), Some(b"ipc".to_vec()));
        drop(client);

        handle.shutdown();
        handle.join().expect("join");
        assert!(!path.exists(), "socket file removed on shutdown");
    }

    #[cfg(unix)]
    #[test]
    fn unix_server_refuses_a_live_socket() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("parley.sock");
        let _live = UnixListener::bind(&path).expect("bind live listener");

        let endpoint = SocketEndpoint::unix(path.to_str().expect("utf8 path"));
        let error = ReplyServer::bind(&endpoint).expect_err("path in use");

        assert!(matches!(error, ListenerError::UnixInUse { .. }));
    }
}
