//! Job submission and submission-result parsing
//!
//! [`submit`] runs the scheduler's submit command with a rendered script,
//! captures its merged output, and parses the reply into a
//! [`SubmissionResult`]. A failed submission is reported, never retried:
//! resubmitting a request that may have been accepted risks duplicate
//! jobs.
//!
//! The result serializes to a single JSON line, printed at the end of a
//! remote submission so the controlling `remoteexec` process can pick it
//! up from the ssh output stream.

use chrono::{DateTime, Utc};
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::{Command, Stdio};
use thiserror::Error;

use crate::process::{self, ProcessError, RunOptions};
use crate::script::{self, DirectiveSet};

/// Scheduler submit command.
pub const SUBMIT_COMMAND: &str = "sbatch";

/// Scheduler cancel command.
pub const CANCEL_COMMAND: &str = "scancel";

/// Outcome of one submission attempt. Produced once, never mutated.
///
/// `job_id` is present exactly when `success` is true, which requires the
/// scheduler reply to match the expected "Submitted batch job" pattern.
/// `log_file` additionally requires an `--output` directive to resolve
/// the template from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionResult {
    pub success: bool,
    /// Raw scheduler reply (or error output on failure)
    pub message: String,
    /// Path of the generated script file
    pub script_file: String,
    pub is_array_task: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

impl SubmissionResult {
    /// A failed submission carrying the scheduler's output for diagnosis.
    pub fn failure(message: String, script_file: String, is_array_task: bool) -> Self {
        Self {
            success: false,
            message,
            script_file,
            is_array_task,
            job_id: None,
            log_file: None,
            submitted_at: Utc::now(),
        }
    }

    /// Whether the submission's log can be followed: successful, not an
    /// array task, and a log file was resolved.
    pub fn is_followable(&self) -> bool {
        self.success && !self.is_array_task && self.log_file.is_some()
    }
}

/// Extract the job id from a submit-command reply.
///
/// Matches the `Submitted batch job <id>` pattern anywhere in the reply,
/// since schedulers may print warnings before it.
pub fn parse_job_id(reply: &str) -> Option<String> {
    let pattern = Regex::new(r"Submitted batch job (\d+)").expect("submit reply pattern is valid");
    pattern
        .captures(reply.trim())
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Submit a rendered script with the scheduler's submit command.
///
/// The directive set is expected to carry `--output`; without it a
/// successful result has no `log_file` and is not followable.
pub fn submit(script_file: &Path, directives: &DirectiveSet) -> SubmissionResult {
    submit_with_command(SUBMIT_COMMAND, script_file, directives)
}

/// Submit with an explicit submit command (seam for tests). See
/// [`submit`] for the `--output` expectation.
pub fn submit_with_command(
    command: &str,
    script_file: &Path,
    directives: &DirectiveSet,
) -> SubmissionResult {
    let is_array_task = directives.is_array_task();
    let script_path = script_file.display().to_string();

    let output = match process::run(command, &[script_path.clone()], &RunOptions::quiet()) {
        Ok(output) => output,
        Err(err) => return SubmissionResult::failure(err.to_string(), script_path, is_array_task),
    };
    let message = output.lines.join("\n").trim().to_string();

    if output.exit_code != 0 {
        return SubmissionResult::failure(message, script_path, is_array_task);
    }

    match parse_job_id(&message) {
        Some(job_id) => {
            let job_name = directives.get("--job-name");
            let log_file = directives
                .get("--output")
                .map(|template| script::resolve_log_path(template, job_name, &job_id));
            SubmissionResult {
                success: true,
                message,
                script_file: script_path,
                is_array_task,
                job_id: Some(job_id),
                log_file,
                submitted_at: Utc::now(),
            }
        }
        None => SubmissionResult::failure(message, script_path, is_array_task),
    }
}

/// Probe whether the scheduler is installed on this host.
pub fn scheduler_available() -> bool {
    Command::new("slurmd")
        .arg("-V")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

/// Parse a structured submission summary from a single output line.
pub fn parse_summary_line(line: &str) -> Option<SubmissionResult> {
    serde_json::from_str(line.trim()).ok()
}

/// Find the submission summary in captured remote output, scanning from
/// the end (the summary is the last line the submitting side prints).
pub fn find_summary(lines: &[String]) -> Option<SubmissionResult> {
    lines.iter().rev().find_map(|line| parse_summary_line(line))
}

/// Cancel-request failure
#[derive(Debug, Error)]
pub enum CancelError {
    #[error("cancel command exited with code {0}")]
    CommandFailed(i32),

    #[error(transparent)]
    Process(#[from] ProcessError),
}

/// Issues a cancel request for a job id.
///
/// Implemented over ssh for remote jobs; test doubles record the call.
pub trait JobCanceller {
    fn cancel(&self, job_id: &str) -> Result<(), CancelError>;
}
