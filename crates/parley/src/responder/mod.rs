//! Reply server answering request frames.
//!
//! The server accepts connections on a [`SocketEndpoint`] and hands every
//! request frame to a [`ReplyHandler`]. It is the peer the socket transport
//! expects: one frame in, at most one frame out. The `parley serve` command
//! runs it; the integration tests use it as a loopback peer.
//!
//! [`SocketEndpoint`]: parley_config::SocketEndpoint

mod errors;
mod handler;
mod listener;

pub use self::errors::ListenerError;
pub use self::handler::{EchoHandler, FixedReplyHandler, ReplyHandler};
pub use self::listener::{ReplyServer, ServerHandle};

const RESPONDER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::responder");
