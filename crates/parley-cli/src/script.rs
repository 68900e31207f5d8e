//! `parley script`: JSON command lines in, JSON output lines out.

use std::io::{BufRead, Write};

use parley::{Engine, run_command};
use serde::Deserialize;
use serde_json::Value;

use crate::errors::AppError;
use crate::write_json_line;

/// One input line, e.g. `{"command": "send", "args": ["tcp://h:1", "PING", 1]}`.
#[derive(Debug, Deserialize)]
struct ScriptLine {
    command: String,
    #[serde(default)]
    args: Vec<Value>,
}

/// Strings pass through; numbers and booleans use their JSON spelling.
fn argument_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Executes every line of `input` against `engine`, then shuts it down.
///
/// Malformed lines are reported on `stderr` and skipped. Returns the number
/// of commands executed.
pub(crate) fn run_script<R, W, E>(
    engine: &Engine,
    input: R,
    stdout: &mut W,
    stderr: &mut E,
) -> Result<usize, AppError>
where
    R: BufRead,
    W: Write,
    E: Write,
{
    let mut executed = 0;
    for (index, line) in input.lines().enumerate() {
        let line = line.map_err(AppError::ReadScript)?;
        if line.trim().is_empty() {
            continue;
        }
        let script_line = match serde_json::from_str::<ScriptLine>(&line) {
            Ok(script_line) => script_line,
            Err(error) => {
                writeln!(stderr, "ignoring line {}: {error}", index + 1)
                    .map_err(AppError::WriteOutput)?;
                continue;
            }
        };
        let args = script_line
            .args
            .iter()
            .map(argument_text)
            .collect::<Vec<_>>();
        let output = run_command(engine, &script_line.command, &args)?;
        write_json_line(stdout, &output)?;
        executed += 1;
    }
    engine.shutdown();
    Ok(executed)
}
