//! Length-prefixed request/reply connections over TCP and Unix sockets.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::{Duration, Instant};

use parley_config::SocketEndpoint;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tracing::debug;

#[cfg(unix)]
use std::os::unix::net::UnixStream;

use super::frame::{self, FrameDecoder};
use super::stream::Stream;
use super::{Connection, Transport, TransportError};

const TRANSPORT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::transport");
const READ_CHUNK_BYTES: usize = 8 * 1024;
const MIN_CONNECT_TIMEOUT: Duration = Duration::from_millis(1);

/// Transport speaking length-prefixed frames over plain sockets.
///
/// Opening only parses the address; the socket is connected by the first
/// send, so an address without a listener fails per request rather than at
/// open time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SocketTransport;

impl SocketTransport {
    /// Builds the transport.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Transport for SocketTransport {
    fn open(&self, address: &str) -> Result<Box<dyn Connection>, TransportError> {
        let endpoint =
            address
                .parse::<SocketEndpoint>()
                .map_err(|source| TransportError::InvalidAddress {
                    address: address.to_owned(),
                    source,
                })?;
        Ok(Box::new(SocketConnection::new(endpoint)))
    }

    fn terminate(&self) {
        debug!(target: TRANSPORT_TARGET, "socket transport released");
    }
}

/// A lazily connected request/reply socket.
#[derive(Debug)]
pub struct SocketConnection {
    endpoint: SocketEndpoint,
    linger: Option<Duration>,
    stream: Option<Stream>,
    decoder: FrameDecoder,
}

impl SocketConnection {
    /// Creates an unconnected socket for `endpoint`.
    #[must_use]
    pub fn new(endpoint: SocketEndpoint) -> Self {
        Self {
            endpoint,
            linger: None,
            stream: None,
            decoder: FrameDecoder::new(),
        }
    }

    /// Endpoint this connection talks to.
    #[must_use]
    pub fn endpoint(&self) -> &SocketEndpoint {
        &self.endpoint
    }

    /// True while a socket is established.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn connected_stream(&mut self, timeout: Duration) -> Result<&mut Stream, TransportError> {
        if self.stream.is_none() {
            let stream = connect(&self.endpoint, self.linger, timeout)?;
            debug!(
                target: TRANSPORT_TARGET,
                endpoint = %self.endpoint,
                "socket connected"
            );
            self.decoder.clear();
            self.stream = Some(stream);
        }
        self.stream.as_mut().ok_or(TransportError::NotConnected)
    }
}

impl Connection for SocketConnection {
    fn set_linger(&mut self, linger: Duration) {
        self.linger = Some(linger);
    }

    fn send(&mut self, payload: &[u8], timeout: Duration) -> Result<(), TransportError> {
        let deadline = Instant::now() + timeout;
        let bytes = frame::encode(payload)?;
        let stream = self.connected_stream(timeout)?;
        write_before(stream, &bytes, deadline)
    }

    fn try_recv(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        if let Some(frame) = self.decoder.next_frame()? {
            return Ok(Some(frame));
        }
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
        let mut chunk = [0_u8; READ_CHUNK_BYTES];
        loop {
            match stream.read(&mut chunk) {
                Ok(0) => return Err(TransportError::Closed),
                Ok(read) => {
                    self.decoder.push(chunk.get(..read).unwrap_or_default());
                    if let Some(frame) = self.decoder.next_frame()? {
                        return Ok(Some(frame));
                    }
                }
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(source) => return Err(TransportError::Receive { source }),
            }
        }
    }

    fn reset(&mut self) {
        if self.stream.take().is_some() {
            debug!(
                target: TRANSPORT_TARGET,
                endpoint = %self.endpoint,
                "socket reset after failed exchange"
            );
        }
        self.decoder.clear();
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take()
            && self.linger != Some(Duration::ZERO)
        {
            if let Err(error) = stream.shutdown() {
                debug!(
                    target: TRANSPORT_TARGET,
                    endpoint = %self.endpoint,
                    error = %error,
                    "peer already gone at close"
                );
            }
        }
        self.decoder.clear();
    }
}

fn write_before(
    stream: &mut Stream,
    mut bytes: &[u8],
    deadline: Instant,
) -> Result<(), TransportError> {
    while !bytes.is_empty() {
        match stream.write(bytes) {
            Ok(0) => return Err(TransportError::Closed),
            Ok(written) => bytes = bytes.get(written..).unwrap_or_default(),
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                if Instant::now() >= deadline {
                    return Err(TransportError::SendTimeout);
                }
                thread::yield_now();
            }
            Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
            Err(source) => return Err(TransportError::Send { source }),
        }
    }
    Ok(())
}

fn connect(
    endpoint: &SocketEndpoint,
    linger: Option<Duration>,
    timeout: Duration,
) -> Result<Stream, TransportError> {
    let timeout = timeout.max(MIN_CONNECT_TIMEOUT);
    let stream = match endpoint {
        SocketEndpoint::Tcp { host, port } => {
            Stream::Tcp(connect_tcp(endpoint, host, *port, linger, timeout)?)
        }
        SocketEndpoint::Unix { path } => {
            #[cfg(unix)]
            {
                Stream::Unix(connect_unix(path.as_str(), timeout).map_err(|source| {
                    TransportError::Connect {
                        endpoint: endpoint.to_string(),
                        source,
                    }
                })?)
            }

            #[cfg(not(unix))]
            {
                let _ = path;
                return Err(TransportError::UnsupportedUnix {
                    endpoint: endpoint.to_string(),
                });
            }
        }
    };
    stream
        .set_nonblocking(true)
        .map_err(|source| TransportError::Connect {
            endpoint: endpoint.to_string(),
            source,
        })?;
    Ok(stream)
}

fn connect_tcp(
    endpoint: &SocketEndpoint,
    host: &str,
    port: u16,
    linger: Option<Duration>,
    timeout: Duration,
) -> Result<TcpStream, TransportError> {
    let addresses = (host, port)
        .to_socket_addrs()
        .map_err(|source| TransportError::Resolve {
            endpoint: endpoint.to_string(),
            source,
        })?
        .collect::<Vec<SocketAddr>>();

    let mut last_error =
        io::Error::new(io::ErrorKind::AddrNotAvailable, "no resolved addresses");
    for address in addresses {
        match connect_tcp_address(address, linger, timeout) {
            Ok(stream) => return Ok(stream),
            Err(error) => last_error = error,
        }
    }
    Err(TransportError::Connect {
        endpoint: endpoint.to_string(),
        source: last_error,
    })
}

fn connect_tcp_address(
    address: SocketAddr,
    linger: Option<Duration>,
    timeout: Duration,
) -> io::Result<TcpStream> {
    let socket = Socket::new(Domain::for_address(address), Type::STREAM, Some(Protocol::TCP))?;
    if let Some(linger) = linger {
        socket.set_linger(Some(linger))?;
    }
    socket.set_nodelay(true)?;
    socket.connect_timeout(&SockAddr::from(address), timeout)?;
    Ok(socket.into())
}

#[cfg(unix)]
fn connect_unix(path: &str, timeout: Duration) -> io::Result<UnixStream> {
    let socket = Socket::new(Domain::UNIX, Type::STREAM, None)?;
    let address = SockAddr::unix(path)?;
    socket.connect_timeout(&address, timeout)?;
    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn open_rejects_unparseable_addresses() {
        let error = SocketTransport::new()
            .open("carrier-pigeon://loft")
            .err()
            .expect("open should fail");
        assert!(matches!(error, TransportError::InvalidAddress { .. }));
    }

    #[test]
    fn open_defers_connecting_until_first_send() {
        let mut connection = SocketConnection::new(SocketEndpoint::tcp("127.0.0.1", 9));
        assert!(!connection.is_connected());
        assert!(matches!(
            connection.try_recv(),
            Err(TransportError::NotConnected)
        ));
    }

    #[test]
    fn send_to_closed_port_fails_quickly() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("reserve port");
        let port = listener.local_addr().expect("local address").port();
        drop(listener);

        let mut connection = SocketConnection::new(SocketEndpoint::tcp("127.0.0.1", port));
        connection.set_linger(Duration::ZERO);
        let started = Instant::now();
        let error = connection
            .send(b"PING", Duration::from_millis(200))
            .expect_err("nothing listens on the port");

        assert!(matches!(error, TransportError::Connect { .. }));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(!connection.is_connected());
    }

    #[test]
    fn exchanges_frames_with_a_peer() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind listener");
        let port = listener.local_addr().expect("listener address").port();
        let peer = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            let request = frame::read_frame(&mut stream)
                .expect("read request")
                .expect("request frame");
            frame::write_frame(&mut stream, &[request.as_slice(), b"-ack".as_slice()].concat())
                .expect("write reply");
        });

        let mut connection = SocketConnection::new(SocketEndpoint::tcp("127.0.0.1", port));
        connection
            .send(b"hello", Duration::from_millis(500))
            .expect("send request");

        let deadline = Instant::now() + Duration::from_secs(2);
        let reply = loop {
            if let Some(frame) = connection.try_recv().expect("receive") {
                break frame;
            }
            assert!(Instant::now() < deadline, "no reply before deadline");
            thread::yield_now();
        };
        assert_eq!(reply, b"hello-ack");
        peer.join().expect("join peer");
    }
}
