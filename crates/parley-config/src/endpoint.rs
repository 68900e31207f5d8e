//! Dialogue addresses.
//!
//! Every dialogue names its peer with an endpoint URL, and the reply server
//! binds to one. Two transports exist: TCP (`tcp://host:port`) and Unix
//! domain sockets (`unix:///path`, also accepted as `ipc:///path`).

use std::fmt;
use std::fs::DirBuilder;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;
use url::{Host, Url};

/// TCP host meaning "every local interface" when binding.
pub const WILDCARD_HOST: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
#[strum(ascii_case_insensitive)]
enum Scheme {
    #[strum(serialize = "tcp")]
    Tcp,
    #[strum(serialize = "unix", serialize = "ipc")]
    Unix,
}

/// Where a dialogue is sent, or where a reply server listens.
///
/// The textual form is the canonical URL: parsing `ipc:///run/peer.sock`
/// and printing it back yields `unix:///run/peer.sock`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum SocketEndpoint {
    /// Peer reached through a Unix domain socket file.
    Unix { path: Utf8PathBuf },
    /// Peer reached over TCP. `host` may be [`WILDCARD_HOST`] for servers.
    Tcp { host: String, port: u16 },
}

impl SocketEndpoint {
    /// Endpoint for the socket file at `path`.
    #[must_use]
    pub fn unix(path: impl Into<Utf8PathBuf>) -> Self {
        Self::Unix { path: path.into() }
    }

    /// Endpoint for `host:port` over TCP.
    #[must_use]
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }

    /// Socket file of a Unix endpoint.
    #[must_use]
    pub fn unix_path(&self) -> Option<&Utf8Path> {
        match self {
            Self::Unix { path } => Some(path.as_ref()),
            Self::Tcp { .. } => None,
        }
    }

    /// Host a server should bind for this endpoint; `None` for Unix sockets.
    ///
    /// [`WILDCARD_HOST`] becomes the IPv4 unspecified address.
    #[must_use]
    pub fn bind_host(&self) -> Option<&str> {
        match self {
            Self::Tcp { host, .. } if host == WILDCARD_HOST => Some("0.0.0.0"),
            Self::Tcp { host, .. } => Some(host),
            Self::Unix { .. } => None,
        }
    }

    /// Creates the directory a Unix socket file will live in.
    ///
    /// Missing directories are created with mode 0700 so only the owner can
    /// reach the socket. TCP endpoints and bare file names need nothing.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointPreparationError`] when the path has no parent or
    /// the directory cannot be created.
    pub fn prepare_filesystem(&self) -> Result<(), EndpointPreparationError> {
        let Some(path) = self.unix_path() else {
            return Ok(());
        };
        let parent = path
            .parent()
            .ok_or_else(|| EndpointPreparationError::NoParent {
                path: path.to_path_buf(),
            })?;
        if parent.as_str().is_empty() {
            return Ok(());
        }

        let mut builder = DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(0o700);
        }
        match builder.create(parent.as_std_path()) {
            Err(source) if source.kind() != std::io::ErrorKind::AlreadyExists => {
                Err(EndpointPreparationError::CreateDirectory {
                    directory: parent.to_path_buf(),
                    source,
                })
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for SocketEndpoint {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix { path } => write!(formatter, "unix://{path}"),
            Self::Tcp { host, port } if host.contains(':') => {
                write!(formatter, "tcp://[{host}]:{port}")
            }
            Self::Tcp { host, port } => write!(formatter, "tcp://{host}:{port}"),
        }
    }
}

impl FromStr for SocketEndpoint {
    type Err = EndpointParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let address = input.trim();
        let url = Url::parse(address).map_err(|source| EndpointParseError::Malformed {
            address: address.to_owned(),
            source,
        })?;
        let scheme = url
            .scheme()
            .parse::<Scheme>()
            .map_err(|_| EndpointParseError::UnknownTransport {
                address: address.to_owned(),
                scheme: url.scheme().to_owned(),
            })?;
        match scheme {
            Scheme::Tcp => tcp_endpoint(address, &url),
            Scheme::Unix => unix_endpoint(address, &url),
        }
    }
}

fn tcp_endpoint(address: &str, url: &Url) -> Result<SocketEndpoint, EndpointParseError> {
    let host = match url.host() {
        Some(Host::Domain(domain)) if !domain.is_empty() => domain.to_owned(),
        Some(Host::Ipv4(ip)) => ip.to_string(),
        Some(Host::Ipv6(ip)) => ip.to_string(),
        _ => {
            return Err(EndpointParseError::NoHost {
                address: address.to_owned(),
            });
        }
    };
    let port = url.port().ok_or_else(|| EndpointParseError::NoPort {
        address: address.to_owned(),
    })?;
    Ok(SocketEndpoint::tcp(host, port))
}

fn unix_endpoint(address: &str, url: &Url) -> Result<SocketEndpoint, EndpointParseError> {
    match url.path() {
        "" | "/" => Err(EndpointParseError::NoSocketPath {
            address: address.to_owned(),
        }),
        path => Ok(SocketEndpoint::unix(path)),
    }
}

/// Reasons a dialogue address is rejected.
#[derive(Debug, Error)]
pub enum EndpointParseError {
    /// The address is not a URL at all.
    #[error("'{address}' is not an endpoint URL: {source}")]
    Malformed {
        address: String,
        #[source]
        source: url::ParseError,
    },
    /// The scheme names no supported transport.
    #[error("'{address}' uses unknown transport '{scheme}' (expected tcp, unix or ipc)")]
    UnknownTransport { address: String, scheme: String },
    /// A TCP address without a host.
    #[error("TCP endpoint '{address}' names no host")]
    NoHost { address: String },
    /// A TCP address without a port.
    #[error("TCP endpoint '{address}' names no port")]
    NoPort { address: String },
    /// A Unix address without a socket file.
    #[error("Unix endpoint '{address}' names no socket file")]
    NoSocketPath { address: String },
}

/// Reasons the directory of a Unix socket could not be prepared.
#[derive(Debug, Error)]
pub enum EndpointPreparationError {
    /// The socket path is a root and has no directory to create.
    #[error("socket path '{path}' has no parent directory")]
    NoParent { path: Utf8PathBuf },
    /// The directory could not be created.
    #[error("cannot create socket directory '{directory}': {source}")]
    CreateDirectory {
        directory: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
}
