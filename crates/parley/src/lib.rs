//! Request/reply dispatch engine.
//!
//! Parley sends *orders* (opaque request payloads) to named endpoints over
//! persistent request/reply connections and hands back exactly one reply per
//! order. A caller either waits for the reply on its own thread
//! ([`Engine::submit_sync`]) or queues the order and collects the finished
//! [`Dialogue`] later ([`Engine::submit_async`] then
//! [`Engine::retrieve_completed`]).
//!
//! Internally the engine is a handful of independently locked services:
//!
//! - a [`ConnectionRegistry`] caching one connection per address;
//! - an [`Invoker`] running one send-then-receive cycle at a time under a
//!   single exclusivity lock, so cycles never overlap even across addresses;
//! - pending and completed [`DialogueQueue`]s;
//! - a [`WorkerPool`] draining the pending queue in the background.
//!
//! Failures never escape as errors: a dialogue that gets no reply within its
//! connection's timeout carries [`FAILURE_MARKER`] as its response and no
//! receive time. The only hard error is failing to start a worker thread.
//!
//! The engine talks to the network only through the [`Transport`] trait.
//! [`SocketTransport`] implements it with length-prefixed frames over TCP and
//! Unix domain sockets; [`responder::ReplyServer`] is the matching peer.

mod clock;
mod command;
mod dialogue;
mod dispatch;
mod invoker;
mod queue;
mod registry;
mod reporter;
pub mod responder;
pub mod telemetry;
pub mod transport;
mod worker;

pub use clock::Timestamp;
pub use command::{Command, CommandOutput, run_command};
pub use dialogue::{Dialogue, DialogueRecord, FAILED_RECEIVE_SENTINEL, FAILURE_MARKER};
pub use dispatch::{DispatchError, Engine, EngineGuard, EngineSettings};
pub use invoker::{InvocationFailure, Invoker};
pub use queue::DialogueQueue;
pub use registry::{ConnectionEntry, ConnectionRegistry};
pub use reporter::{Reporter, StructuredReporter};
pub use telemetry::TelemetryError;
pub use transport::{Connection, SocketTransport, Transport, TransportError};
pub use worker::{PoolPause, WorkerContext, WorkerDescriptor, WorkerError, WorkerPool};
