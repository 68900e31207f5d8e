//! Command-line interface definition.

use clap::{Parser, Subcommand};
use parley_config::SocketEndpoint;

/// Request/reply dispatch from the command line.
///
/// Configuration flags such as `--reply-timeout-ms` or `--config-path` must
/// precede the subcommand.
#[derive(Parser, Debug)]
#[command(name = "parley", version, disable_help_subcommand = true)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: CliCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub(crate) enum CliCommand {
    /// Runs a reply server until interrupted.
    Serve {
        /// Endpoint to listen on, e.g. `tcp://*:5555` or `unix:///tmp/p.sock`.
        endpoint: SocketEndpoint,
        /// Reply with this text instead of echoing each request.
        #[arg(long, value_name = "TEXT")]
        reply: Option<String>,
    },
    /// Sends one order and prints the finished dialogue as JSON.
    Send {
        /// Endpoint address, e.g. `tcp://localhost:5555`.
        address: String,
        /// Request payload.
        order: String,
    },
    /// Executes JSON command lines read from stdin.
    ///
    /// Each line is an object such as
    /// `{"command": "send", "args": ["tcp://localhost:5555", "PING"]}`; one
    /// JSON output line is written per command.
    Script,
}
