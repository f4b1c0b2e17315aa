//! Subprocess execution with line-oriented output streaming
//!
//! Every external command (rsync, ssh, sbatch, scancel, the remote tail)
//! goes through this module. A [`StreamingChild`] merges the child's stdout
//! and stderr into a single line stream that the caller consumes with a
//! bounded poll, so interrupt handling never blocks on a silent child.
//!
//! Streamed output is framed with box-drawing characters so that remote
//! output is visually separated from local messages.

use std::io::{self, BufRead, BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;

/// Width of the output frame drawn around streamed command output.
pub const FRAME_WIDTH: usize = 80;

/// Poll interval used by [`run_streamed`] while waiting for output lines.
const READ_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Error spawning or waiting on an external command
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to spawn `{program}`: {source}")]
    Spawn { program: String, source: io::Error },

    #[error("failed to wait for `{program}`: {source}")]
    Wait { program: String, source: io::Error },
}

/// Presentation options for a streamed command
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Title printed in the frame header (omitted when `None`)
    pub title: Option<String>,
    /// Suppress all frame output; lines are still captured
    pub silent: bool,
}

impl RunOptions {
    /// Options for a framed run with a title line
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            silent: false,
        }
    }

    /// Options for a silent run (capture only)
    pub fn quiet() -> Self {
        Self {
            title: None,
            silent: true,
        }
    }
}

/// Captured result of a completed command
#[derive(Debug)]
pub struct RunOutput {
    /// Exit code of the child (-1 if terminated by a signal)
    pub exit_code: i32,
    /// All output lines, stdout and stderr merged
    pub lines: Vec<String>,
}

/// What to do with a single output line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineDisposition {
    /// Print the line inside the frame (unless silent)
    Print,
    /// Capture the line but do not print it
    Suppress,
    /// Stop the child; the line is still captured
    Terminate,
}

/// Result of polling a [`StreamingChild`] for the next line
#[derive(Debug)]
pub enum LinePoll {
    /// A new output line arrived
    Line(String),
    /// No output within the timeout; the child may still be running
    Idle,
    /// Both output streams have closed
    Closed,
}

/// A spawned child process whose merged output is consumed line by line.
///
/// Reader threads pump stdout and stderr into a channel; the owner polls
/// with [`StreamingChild::next_line`] and can terminate the child at any
/// point between reads.
pub struct StreamingChild {
    program: String,
    child: Child,
    rx: Receiver<String>,
    readers: Vec<JoinHandle<()>>,
}

impl StreamingChild {
    /// Spawn a command with piped stdout/stderr and start the line readers.
    pub fn spawn(program: &str, args: &[String]) -> Result<Self, ProcessError> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                program: program.to_string(),
                source,
            })?;

        let (tx, rx) = mpsc::channel();
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(forward_lines(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(forward_lines(stderr, tx));
        }

        Ok(Self {
            program: program.to_string(),
            child,
            rx,
            readers,
        })
    }

    /// Wait up to `timeout` for the next output line.
    pub fn next_line(&self, timeout: Duration) -> LinePoll {
        match self.rx.recv_timeout(timeout) {
            Ok(line) => LinePoll::Line(line),
            Err(RecvTimeoutError::Timeout) => LinePoll::Idle,
            Err(RecvTimeoutError::Disconnected) => LinePoll::Closed,
        }
    }

    /// Kill the child. Safe to call more than once.
    pub fn terminate(&mut self) {
        let _ = self.child.kill();
    }

    /// Wait for the child to exit and return its exit code.
    pub fn wait(mut self) -> Result<i32, ProcessError> {
        let status = self.child.wait().map_err(|source| ProcessError::Wait {
            program: self.program.clone(),
            source,
        })?;
        for reader in self.readers.drain(..) {
            let _ = reader.join();
        }
        Ok(status.code().unwrap_or(-1))
    }
}

fn forward_lines(stream: impl Read + Send + 'static, tx: Sender<String>) -> JoinHandle<()> {
    thread::spawn(move || {
        let reader = BufReader::new(stream);
        for line in reader.lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    })
}

/// Run a command to completion, inspecting every output line.
///
/// The `inspect` callback decides per line whether it is printed,
/// suppressed, or terminates the child. All lines are captured in the
/// returned [`RunOutput`] regardless of disposition.
pub fn run_streamed<F>(
    program: &str,
    args: &[String],
    options: &RunOptions,
    mut inspect: F,
) -> Result<RunOutput, ProcessError>
where
    F: FnMut(&str) -> LineDisposition,
{
    if !options.silent {
        print_frame_top(options.title.as_deref());
    }

    let mut child = StreamingChild::spawn(program, args)?;
    let mut lines = Vec::new();
    loop {
        match child.next_line(READ_POLL_INTERVAL) {
            LinePoll::Line(line) => {
                let disposition = inspect(&line);
                if !options.silent && disposition == LineDisposition::Print {
                    print_frame_line(&line);
                }
                lines.push(line);
                if disposition == LineDisposition::Terminate {
                    child.terminate();
                    break;
                }
            }
            LinePoll::Idle => {}
            LinePoll::Closed => break,
        }
    }

    let exit_code = child.wait()?;
    if !options.silent {
        print_frame_bottom(exit_code);
    }
    Ok(RunOutput { exit_code, lines })
}

/// Run a command to completion, printing every output line.
pub fn run(program: &str, args: &[String], options: &RunOptions) -> Result<RunOutput, ProcessError> {
    run_streamed(program, args, options, |_| LineDisposition::Print)
}

/// Print the top of an output frame, with an optional title row.
pub fn print_frame_top(title: Option<&str>) {
    println!("╔{}╗", "═".repeat(FRAME_WIDTH));
    if let Some(title) = title {
        println!("║ {}", title);
        println!("╟{}╢", "─".repeat(FRAME_WIDTH));
    }
}

/// Print a single line inside the output frame.
pub fn print_frame_line(line: &str) {
    println!("║ {}", line);
}

/// Print the bottom of an output frame, annotated with the exit code.
pub fn print_frame_bottom(exit_code: i32) {
    println!("╚{} --> {}", "═".repeat(FRAME_WIDTH), exit_code);
}

/// Print the bottom of an output frame without an exit code annotation.
pub fn print_frame_close() {
    println!("╚{}╝", "═".repeat(FRAME_WIDTH));
}
