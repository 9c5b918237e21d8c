//! Subprocess helpers shared by the git and manage.py wrappers.
//!
//! Every command is run to completion before the caller continues. Output is
//! either inherited (so the user sees migrate/makemigrations progress) or
//! captured for parsing.

use std::io::{self, Read};
use std::path::Path;
use std::process::{Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{Result, SyncError};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Where the stdout of a command run with [`run_inherited`] goes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StdoutTarget {
    /// Share this process's stdout.
    #[default]
    Inherit,
    /// Send it to this process's stderr, keeping stdout for machine-readable output.
    Stderr,
}

/// Render a program and its arguments as a single shell-like line.
///
/// Arguments containing whitespace or quotes are single-quoted so the line
/// can be pasted back into a shell.
pub fn display_command(program: &str, args: &[String]) -> String {
    let mut parts = Vec::with_capacity(args.len() + 1);
    parts.push(quote_arg(program));
    parts.extend(args.iter().map(|a| quote_arg(a)));
    parts.join(" ")
}

fn quote_arg(arg: &str) -> String {
    if arg.is_empty() {
        return "''".to_string();
    }
    if arg
        .chars()
        .any(|c| c.is_whitespace() || matches!(c, '\'' | '"' | ';' | '$' | '`'))
    {
        format!("'{}'", arg.replace('\'', r"'\''"))
    } else {
        arg.to_string()
    }
}

/// Run a command with inherited stdio and fail on a non-zero exit status.
pub fn run_inherited(
    program: &str,
    args: &[String],
    cwd: &Path,
    stdout: StdoutTarget,
) -> Result<()> {
    let display = display_command(program, args);
    log::debug!("Running command; command={}, cwd={}", display, cwd.display());

    let mut command = Command::new(program);
    command.args(args).current_dir(cwd);
    if stdout == StdoutTarget::Stderr {
        command.stdout(Stdio::from(io::stderr()));
    }

    let status = command
        .status()
        .map_err(|e| SyncError::CommandFailed {
            command: display.clone(),
            reason: format!("could not start: {}", e),
        })?;

    if !status.success() {
        return Err(SyncError::CommandFailed {
            command: display,
            reason: describe_status(status.code()),
        });
    }
    Ok(())
}

/// Run a command capturing stdout and stderr.
///
/// Returns the raw `Output`; callers decide whether a non-zero status is
/// an error (e.g. `git rev-parse --verify` uses it as a boolean answer).
pub fn capture(program: &str, args: &[String], cwd: &Path) -> Result<Output> {
    log::debug!(
        "Capturing command; command={}, cwd={}",
        display_command(program, args),
        cwd.display()
    );
    Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| SyncError::CommandFailed {
            command: display_command(program, args),
            reason: format!("could not start: {}", e),
        })
}

/// Run a command capturing stdout, killing it if it outlives `timeout`.
///
/// Returns stdout on a zero exit status.
pub fn capture_with_timeout(
    program: &str,
    args: &[String],
    cwd: &Path,
    timeout: Duration,
) -> Result<String> {
    let display = display_command(program, args);
    log::debug!(
        "Capturing command with timeout; command={}, timeout_secs={}",
        display,
        timeout.as_secs()
    );

    let mut child = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| SyncError::CommandFailed {
            command: display.clone(),
            reason: format!("could not start: {}", e),
        })?;

    // Drain pipes on separate threads so a chatty child cannot block on a full pipe.
    let stdout_reader = child.stdout.take().map(spawn_reader);
    let stderr_reader = child.stderr.take().map(spawn_reader);

    let deadline = Instant::now() + timeout;
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if Instant::now() >= deadline {
            if let Err(e) = child.kill() {
                log::warn!("Failed to kill timed out command; command={}, error={}", display, e);
            }
            let _ = child.wait();
            return Err(SyncError::CommandTimedOut {
                command: display,
                secs: timeout.as_secs(),
            });
        }
        thread::sleep(POLL_INTERVAL);
    };

    let stdout = join_reader(stdout_reader);
    let stderr = join_reader(stderr_reader);

    if !status.success() {
        let reason = match stderr.trim() {
            "" => describe_status(status.code()),
            msg => format!("{}: {}", describe_status(status.code()), last_line(msg)),
        };
        return Err(SyncError::CommandFailed {
            command: display,
            reason,
        });
    }
    Ok(stdout)
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn join_reader(handle: Option<thread::JoinHandle<String>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}

fn last_line(text: &str) -> &str {
    text.lines().last().unwrap_or(text).trim()
}

/// Human-readable description of an exit status code.
pub fn describe_status(code: Option<i32>) -> String {
    match code {
        Some(c) => format!("exit status {}", c),
        None => "terminated by signal".to_string(),
    }
}
