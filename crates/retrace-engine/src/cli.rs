//! Line-oriented control loop shared by the recording binaries.

use crate::formatter::format_response;
use crate::service::RecorderHandle;
use retrace_common::protocol::ControlCommand;
use std::error::Error;
use std::io::{self, Write};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Clone, Copy)]
pub struct OutputHandlers {
    pub out: fn(&str),
    pub err: fn(&str),
}

pub struct ReplOptions<'a> {
    pub banner_lines: &'a [&'a str],
    pub prompt: &'a str,
    pub exit_commands: &'a [&'a str],
    pub handle_ctrl_c: bool,
    pub ctrl_c_message: Option<&'a str>,
}

impl Default for ReplOptions<'_> {
    fn default() -> Self {
        Self {
            banner_lines: &[
                "Commands: start, stop, clear, flush, export, get_all, exit",
            ],
            prompt: "retrace> ",
            exit_commands: &["exit", "quit"],
            handle_ctrl_c: true,
            ctrl_c_message: Some("Interrupted"),
        }
    }
}

/// Parse and send one control line.
pub async fn execute_line(handle: &RecorderHandle, line: &str) -> Result<String, String> {
    let cmd: ControlCommand = line.parse().map_err(|e| format!("{}", e))?;
    let response = handle.send(cmd).await.map_err(|e| format!("{}", e))?;
    if response.ok {
        Ok(format_response(&response))
    } else {
        Err(response.error.unwrap_or_else(|| "command failed".into()))
    }
}

/// Possible outcomes from reading a single REPL line.
enum ReadLineResult {
    /// A non-empty input line to process.
    Input(String),
    /// Empty line, skip and re-prompt.
    Skip,
    /// EOF or exit command.
    Exit,
    Error(io::Error),
}

async fn read_line(
    reader: &mut tokio::io::Lines<BufReader<tokio::io::Stdin>>,
    exit_commands: &[&str],
    handle_ctrl_c: bool,
    ctrl_c_message: Option<&str>,
    output: OutputHandlers,
) -> ReadLineResult {
    if handle_ctrl_c {
        tokio::select! {
            line = reader.next_line() => {
                classify_line(line, exit_commands)
            }
            _ = tokio::signal::ctrl_c() => {
                if let Some(message) = ctrl_c_message {
                    (output.out)(message);
                }
                ReadLineResult::Exit
            }
        }
    } else {
        classify_line(reader.next_line().await, exit_commands)
    }
}

fn classify_line(
    result: Result<Option<String>, io::Error>,
    exit_commands: &[&str],
) -> ReadLineResult {
    match result {
        Ok(Some(input)) => {
            let trimmed = input.trim().to_string();
            if trimmed.is_empty() {
                ReadLineResult::Skip
            } else if exit_commands.contains(&trimmed.to_ascii_lowercase().as_str()) {
                ReadLineResult::Exit
            } else {
                ReadLineResult::Input(trimmed)
            }
        }
        Ok(None) => ReadLineResult::Exit,
        Err(e) => ReadLineResult::Error(e),
    }
}

pub async fn run_repl(
    handle: &RecorderHandle,
    output: OutputHandlers,
    options: ReplOptions<'_>,
) -> Result<(), Box<dyn Error>> {
    for line in options.banner_lines {
        (output.out)(line);
    }

    let stdin = tokio::io::stdin();
    let mut reader = BufReader::new(stdin).lines();
    let mut stdout = io::stdout();

    loop {
        print!("{}", options.prompt);
        stdout.flush()?;

        match read_line(
            &mut reader,
            options.exit_commands,
            options.handle_ctrl_c,
            options.ctrl_c_message,
            output,
        )
        .await
        {
            ReadLineResult::Input(line) => match execute_line(handle, &line).await {
                Ok(result) => (output.out)(&result),
                Err(err) => (output.err)(&format!("Error: {}", err)),
            },
            ReadLineResult::Skip => continue,
            ReadLineResult::Exit => break,
            ReadLineResult::Error(e) => return Err(e.into()),
        }
    }
    Ok(())
}
