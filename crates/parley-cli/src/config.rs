//! Separates configuration flags from the subcommand line.
//!
//! Configuration flags lead the argument list and go to `ortho_config`;
//! everything from the first other token on is parsed by `clap`.

use std::ffi::{OsStr, OsString};

use ortho_config::OrthoConfig;
use parley_config::Config;

use crate::errors::AppError;

/// Flags understood by the configuration loader. Must track the fields of
/// [`Config`].
const CONFIG_FLAGS: &[&str] = &[
    "--config-path",
    "--log-filter",
    "--log-format",
    "--reply-timeout-ms",
    "--worker-count",
    "--worker-idle-ms",
    "--drain-poll-ms",
    "--shutdown-poll-ms",
];

/// Source of resolved configuration.
pub(crate) trait ConfigLoader {
    /// Loads configuration from the leading flag arguments (program name
    /// first).
    fn load(&self, args: &[OsString]) -> Result<Config, AppError>;
}

/// Layered loader: defaults, file, `PARLEY_*` environment, flags.
pub(crate) struct OrthoConfigLoader;

impl ConfigLoader for OrthoConfigLoader {
    fn load(&self, args: &[OsString]) -> Result<Config, AppError> {
        Config::load_from_iter(args.iter().cloned()).map_err(AppError::LoadConfiguration)
    }
}

/// Arguments split into the configuration part and the `clap` part. Both
/// start with the program name.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct SplitArguments {
    pub(crate) config: Vec<OsString>,
    pub(crate) command: Vec<OsString>,
}

/// Returns how many arguments a leading token consumes as a configuration
/// flag: 0 when it is not one, 1 for `--flag=value`, 2 for `--flag value`.
fn config_flag_width(argument: &OsStr) -> usize {
    let text = argument.to_string_lossy();
    let (flag, inline_value) = match text.split_once('=') {
        Some((flag, _)) => (flag, true),
        None => (&*text, false),
    };
    match (CONFIG_FLAGS.contains(&flag), inline_value) {
        (false, _) => 0,
        (true, true) => 1,
        (true, false) => 2,
    }
}

pub(crate) fn split_arguments(args: &[OsString]) -> SplitArguments {
    let Some((program, rest)) = args.split_first() else {
        return SplitArguments {
            config: Vec::new(),
            command: Vec::new(),
        };
    };

    let mut consumed = 0;
    while let Some(argument) = rest.get(consumed) {
        let width = config_flag_width(argument);
        if width == 0 {
            break;
        }
        consumed = (consumed + width).min(rest.len());
    }
    let (config_flags, command) = rest.split_at(consumed);

    SplitArguments {
        config: std::iter::once(program).chain(config_flags).cloned().collect(),
        command: std::iter::once(program).chain(command).cloned().collect(),
    }
}
