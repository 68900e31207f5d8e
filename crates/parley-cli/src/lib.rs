//! Runtime of the `parley` binary.
//!
//! `parley serve` runs a reply server, `parley send` performs one synchronous
//! exchange and `parley script` drives the engine through its command
//! surface from JSON lines on stdin. Leading configuration flags are split
//! off and handed to the layered configuration loader; the rest is parsed by
//! `clap`.

use std::ffi::OsString;
use std::io::{BufRead, Write};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use parley::responder::{EchoHandler, FixedReplyHandler, ReplyHandler, ReplyServer};
use parley::{Engine, telemetry};
use parley_config::{Config, SocketEndpoint};
use serde::Serialize;

mod cli;
mod config;
mod errors;
mod script;
mod signal;

use cli::{Cli, CliCommand};
use config::{ConfigLoader, OrthoConfigLoader, split_arguments};
use errors::AppError;
use signal::{ShutdownSignal, SystemShutdownSignal};

/// Runs the binary with the given arguments and streams.
#[must_use]
pub fn run<I, R, W, E>(args: I, stdin: R, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    R: BufRead,
    W: Write,
    E: Write,
{
    let mut io = IoStreams { stdout, stderr };
    run_with(args, stdin, &mut io, &OrthoConfigLoader, &SystemShutdownSignal)
}

struct IoStreams<'a, W: Write, E: Write> {
    stdout: &'a mut W,
    stderr: &'a mut E,
}

fn run_with<I, R, W, E>(
    args: I,
    stdin: R,
    io: &mut IoStreams<'_, W, E>,
    loader: &impl ConfigLoader,
    signal: &impl ShutdownSignal,
) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    R: BufRead,
    W: Write,
    E: Write,
{
    let args = args.into_iter().collect::<Vec<_>>();
    let split = split_arguments(&args);

    let result = Cli::try_parse_from(&split.command)
        .map_err(AppError::CliUsage)
        .and_then(|cli| loader.load(&split.config).map(|config| (cli, config)))
        .and_then(|(cli, config)| {
            telemetry::initialise(&config)?;
            execute(cli.command, &config, stdin, io, signal)
        });

    match result {
        Ok(exit_code) => exit_code,
        Err(AppError::CliUsage(error)) if !error.use_stderr() => {
            let _ = write!(io.stdout, "{error}");
            ExitCode::SUCCESS
        }
        Err(error) => {
            let _ = writeln!(io.stderr, "parley: {error}");
            ExitCode::FAILURE
        }
    }
}

fn execute<R, W, E>(
    command: CliCommand,
    config: &Config,
    stdin: R,
    io: &mut IoStreams<'_, W, E>,
    signal: &impl ShutdownSignal,
) -> Result<ExitCode, AppError>
where
    R: BufRead,
    W: Write,
    E: Write,
{
    match command {
        CliCommand::Serve { endpoint, reply } => serve(&endpoint, reply, io.stdout, signal),
        CliCommand::Send { address, order } => {
            let engine = Engine::from_config(config);
            let dialogue = engine.submit_sync(&address, &order);
            engine.shutdown();
            write_json_line(io.stdout, &dialogue.to_record())?;
            Ok(if dialogue.is_failed() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            })
        }
        CliCommand::Script => {
            let engine = Engine::from_config(config);
            script::run_script(&engine, stdin, io.stdout, io.stderr)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn serve<W: Write>(
    endpoint: &SocketEndpoint,
    reply: Option<String>,
    stdout: &mut W,
    signal: &impl ShutdownSignal,
) -> Result<ExitCode, AppError> {
    let server = ReplyServer::bind(endpoint)?;
    let bound = server.endpoint();
    let handler: Arc<dyn ReplyHandler> = match reply {
        Some(text) => Arc::new(FixedReplyHandler::new(text)),
        None => Arc::new(EchoHandler),
    };
    let handle = server.start(handler)?;

    writeln!(stdout, "listening on {bound}")
        .and_then(|()| stdout.flush())
        .map_err(AppError::WriteOutput)?;
    let waited = signal.wait();

    handle.shutdown();
    handle.join()?;
    waited?;
    Ok(ExitCode::SUCCESS)
}

pub(crate) fn write_json_line<W: Write, T: Serialize>(
    writer: &mut W,
    value: &T,
) -> Result<(), AppError> {
    serde_json::to_writer(&mut *writer, value).map_err(AppError::Serialise)?;
    writeln!(writer)
        .and_then(|()| writer.flush())
        .map_err(AppError::WriteOutput)
}
