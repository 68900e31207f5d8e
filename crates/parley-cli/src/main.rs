//! Entry point of the `parley` binary.
//!
//! All behaviour lives in [`parley_cli::run`] so tests can drive it with
//! in-memory streams.

use std::io;
use std::process::ExitCode;

fn main() -> ExitCode {
    let stdin = io::stdin().lock();
    let mut stdout = io::stdout().lock();
    let mut stderr = io::stderr().lock();
    parley_cli::run(std::env::args_os(), stdin, &mut stdout, &mut stderr)
}
