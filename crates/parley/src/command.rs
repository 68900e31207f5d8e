//! Host-facing command surface.
//!
//! Hosts drive the engine by name: a command string plus positional string
//! arguments. Names are matched case-insensitively and the legacy names
//! (`StartConnectThread`, `Send`, `GetResponses`, `CloseThread`, `CloseAll`)
//! are accepted as aliases. Unknown commands and missing or malformed
//! arguments are ignored and produce [`CommandOutput::Nothing`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::dialogue::DialogueRecord;
use crate::dispatch::{DispatchError, Engine};

const COMMAND_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::command");

/// A parsed host command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Echo the address back; connections themselves open lazily.
    Connect {
        /// Endpoint address.
        address: String,
    },
    /// Submit an order.
    Send {
        /// Endpoint address.
        address: String,
        /// Request payload.
        order: String,
        /// Wait for the reply on the calling thread.
        blocking: bool,
    },
    /// Retrieve completed asynchronous dialogues.
    GetResponses {
        /// Wait until every prior submission has completed.
        wait_for_drain: bool,
    },
    /// Override the reply timeout of one address.
    SetTimeout {
        /// Endpoint address.
        address: String,
        /// New timeout.
        timeout: Duration,
    },
    /// Ask every worker to stop without waiting.
    CloseThreads,
    /// Shut the engine down.
    CloseAll,
}

impl Command {
    /// Parses a command name and its positional arguments.
    ///
    /// Returns `None` for unknown names and for missing or malformed
    /// required arguments.
    #[must_use]
    pub fn parse<S: AsRef<str>>(name: &str, args: &[S]) -> Option<Self> {
        let arg = |index: usize| args.get(index).map(AsRef::as_ref);
        let name = name.trim().to_ascii_lowercase();
        match name.as_str() {
            "connect" | "startconnectthread" => Some(Self::Connect {
                address: arg(0)?.to_owned(),
            }),
            "send" => Some(Self::Send {
                address: arg(0)?.to_owned(),
                order: arg(1)?.to_owned(),
                blocking: arg(2).is_some_and(is_truthy),
            }),
            "getresponses" => Some(Self::GetResponses {
                wait_for_drain: arg(0).is_some_and(is_truthy),
            }),
            "settimeout" => {
                let millis = arg(1)?.trim().parse::<u64>().ok()?;
                Some(Self::SetTimeout {
                    address: arg(0)?.to_owned(),
                    timeout: Duration::from_millis(millis),
                })
            }
            "closethreads" | "closethread" => Some(Self::CloseThreads),
            "closeall" => Some(Self::CloseAll),
            _ => None,
        }
    }
}

/// True for `true` (any case) and for any number greater than zero.
fn is_truthy(flag: &str) -> bool {
    let flag = flag.trim();
    flag.eq_ignore_ascii_case("true") || flag.parse::<f64>().is_ok_and(|value| value > 0.0)
}

/// Result of executing a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum CommandOutput {
    /// Address echoed by `connect`.
    Address {
        /// Endpoint address.
        address: String,
    },
    /// Outcome of a blocking `send`.
    Response {
        /// Reply payload or failure marker.
        response: String,
        /// Full record of the exchange.
        dialogue: DialogueRecord,
    },
    /// Token returned by a non-blocking `send`.
    Token {
        /// Submission time in microseconds.
        #[serde(rename = "timeSubmitted")]
        time_submitted: i64,
    },
    /// Dialogues handed out by `getResponses`.
    Responses {
        /// Completed dialogues in submission order.
        dialogues: Vec<DialogueRecord>,
    },
    /// The command produces no value or was ignored.
    Nothing,
}

impl Engine {
    /// Executes a parsed command.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError`] when a non-blocking send cannot start a
    /// worker.
    pub fn execute(&self, command: Command) -> Result<CommandOutput, DispatchError> {
        let output = match command {
            Command::Connect { address } => CommandOutput::Address { address },
            Command::Send {
                address,
                order,
                blocking: true,
            } => {
                let dialogue = self.submit_sync(&address, &order);
                CommandOutput::Response {
                    response: dialogue.response().to_owned(),
                    dialogue: dialogue.to_record(),
                }
            }
            Command::Send { address, order, .. } => {
                let token = self.submit_async(&address, &order)?;
                CommandOutput::Token {
                    time_submitted: token.as_micros(),
                }
            }
            Command::GetResponses { wait_for_drain } => CommandOutput::Responses {
                dialogues: self
                    .retrieve_completed(wait_for_drain)
                    .iter()
                    .map(crate::dialogue::Dialogue::to_record)
                    .collect(),
            },
            Command::SetTimeout { address, timeout } => {
                if let Err(error) = self.set_timeout(&address, timeout) {
                    warn!(
                        target: COMMAND_TARGET,
                        address = %address,
                        error = %error,
                        "timeout not applied"
                    );
                }
                CommandOutput::Nothing
            }
            Command::CloseThreads => {
                self.request_stop();
                CommandOutput::Nothing
            }
            Command::CloseAll => {
                self.shutdown();
                CommandOutput::Nothing
            }
        };
        Ok(output)
    }
}

/// Parses and executes a named command against `engine`.
///
/// # Errors
///
/// Propagates [`Engine::execute`] failures.
pub fn run_command<S: AsRef<str>>(
    engine: &Engine,
    name: &str,
    args: &[S],
) -> Result<CommandOutput, DispatchError> {
    let Some(command) = Command::parse(name, args) else {
        debug!(
            target: COMMAND_TARGET,
            command = name,
            arguments = args.len(),
            "ignoring unknown command or incomplete arguments"
        );
        return Ok(CommandOutput::Nothing);
    };
    engine.execute(command)
}
