//! Shared configuration for the Parley dispatch engine and its binaries.
//!
//! Configuration is layered by `ortho_config`: built-in defaults, then a
//! configuration file (selected with `--config-path` or discovered), then
//! `PARLEY_*` environment variables, then command-line flags.

mod defaults;
mod endpoint;
mod logging;

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use defaults::{
    DEFAULT_DRAIN_POLL_MS, DEFAULT_LOG_FILTER, DEFAULT_REPLY_TIMEOUT_MS, DEFAULT_SHUTDOWN_POLL_MS,
    DEFAULT_WORKER_COUNT, DEFAULT_WORKER_IDLE_MS, default_log_filter, default_log_filter_string,
    default_log_format, default_reply_timeout,
};
pub use endpoint::{
    EndpointParseError, EndpointPreparationError, SocketEndpoint, WILDCARD_HOST,
};
pub use logging::{LogFormat, LogFormatParseError};

/// Resolved configuration shared by the engine and the `parley` binary.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "PARLEY")]
pub struct Config {
    /// `tracing` filter expression, e.g. `info` or `parley::invoker=debug`.
    #[ortho_config(default = defaults::default_log_filter_string())]
    pub log_filter: String,
    /// Output format for log events.
    #[ortho_config(default = defaults::default_log_format())]
    pub log_format: LogFormat,
    /// Default reply timeout applied to newly opened connections.
    #[ortho_config(default = defaults::DEFAULT_REPLY_TIMEOUT_MS)]
    pub reply_timeout_ms: u64,
    /// Number of workers spawned when the asynchronous path finds none running.
    #[ortho_config(default = defaults::DEFAULT_WORKER_COUNT)]
    pub worker_count: usize,
    /// Interval an idle worker waits for work before re-checking its flag.
    #[ortho_config(default = defaults::DEFAULT_WORKER_IDLE_MS)]
    pub worker_idle_ms: u64,
    /// Re-check interval while a retrieval waits for outstanding work.
    #[ortho_config(default = defaults::DEFAULT_DRAIN_POLL_MS)]
    pub drain_poll_ms: u64,
    /// Re-check interval while shutdown waits for workers to exit.
    #[ortho_config(default = defaults::DEFAULT_SHUTDOWN_POLL_MS)]
    pub shutdown_poll_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            reply_timeout_ms: DEFAULT_REPLY_TIMEOUT_MS,
            worker_count: DEFAULT_WORKER_COUNT,
            worker_idle_ms: DEFAULT_WORKER_IDLE_MS,
            drain_poll_ms: DEFAULT_DRAIN_POLL_MS,
            shutdown_poll_ms: DEFAULT_SHUTDOWN_POLL_MS,
        }
    }
}

impl Config {
    /// Filter expression handed to the `tracing` subscriber.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        self.log_filter.as_str()
    }

    /// Log output format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Reply timeout applied to newly opened connections.
    #[must_use]
    pub const fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }

    /// Number of workers to spawn; never less than one.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.worker_count.max(1)
    }

    /// Idle interval of a worker with nothing to do.
    #[must_use]
    pub const fn worker_idle(&self) -> Duration {
        Duration::from_millis(self.worker_idle_ms)
    }

    /// Re-check interval used while draining.
    #[must_use]
    pub const fn drain_poll(&self) -> Duration {
        Duration::from_millis(self.drain_poll_ms)
    }

    /// Re-check interval used while shutting down.
    #[must_use]
    pub const fn shutdown_poll(&self) -> Duration {
        Duration::from_millis(self.shutdown_poll_ms)
    }
}
