//! Default values shared by the engine, the binaries and the configuration
//! loader.

use std::time::Duration;

use crate::logging::LogFormat;

/// Log filter applied when neither configuration nor environment set one.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Time a connection waits for a reply before the dialogue is failed.
pub const DEFAULT_REPLY_TIMEOUT_MS: u64 = 500;

/// Number of workers spawned when the asynchronous path finds none running.
pub const DEFAULT_WORKER_COUNT: usize = 1;

/// Interval an idle worker waits before re-checking its stop flag.
pub const DEFAULT_WORKER_IDLE_MS: u64 = 10;

/// Upper bound between re-checks while a retrieval waits for outstanding work.
pub const DEFAULT_DRAIN_POLL_MS: u64 = 1;

/// Upper bound between re-checks while shutdown waits for workers to exit.
pub const DEFAULT_SHUTDOWN_POLL_MS: u64 = 10;

/// Default log filter expression used by the binaries.
#[must_use]
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format for the binaries.
#[must_use]
pub fn default_log_format() -> LogFormat {
    LogFormat::Compact
}

/// Default reply timeout as a [`Duration`].
#[must_use]
pub const fn default_reply_timeout() -> Duration {
    Duration::from_millis(DEFAULT_REPLY_TIMEOUT_MS)
}
