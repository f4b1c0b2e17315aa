//! rsync and ssh wrappers
//!
//! Thin command builders around the file-sync and remote-shell tools. The
//! remote command is always wrapped in `bash -l -c` so the user's login
//! environment is active on the remote host.

use std::path::Path;

use crate::process::{self, ProcessError, RunOptions, RunOutput, StreamingChild};
use crate::script::shell_quote;
use crate::submit::{CancelError, JobCanceller, CANCEL_COMMAND};

pub const RSYNC_COMMAND: &str = "rsync";
pub const SSH_COMMAND: &str = "ssh";

/// Sync a local directory to a remote destination (`host:dir`).
pub fn rsync(
    src: &Path,
    dst: &str,
    excludes: &[String],
    options: &RunOptions,
) -> Result<RunOutput, ProcessError> {
    let mut args = vec!["-avz".to_string(), "--progress".to_string()];
    for pattern in excludes {
        args.push("--exclude".to_string());
        args.push(pattern.clone());
    }
    args.push(src.display().to_string());
    args.push(dst.to_string());
    process::run(RSYNC_COMMAND, &args, options)
}

/// Execute a shell command on a remote host.
pub fn ssh_exec(
    remote: &str,
    command: &str,
    options: &RunOptions,
) -> Result<RunOutput, ProcessError> {
    process::run(
        SSH_COMMAND,
        &[remote.to_string(), command.to_string()],
        options,
    )
}

/// Build the remote shell command: change into the synced directory and
/// run the user's command under a login shell.
pub fn remote_shell_command(dir: &str, command: &[String]) -> String {
    let quoted = command
        .iter()
        .map(|arg| shell_quote(arg))
        .collect::<Vec<_>>()
        .join(" ");
    format!("cd {} && bash -l -c {}", dir, shell_quote(&quoted))
}

/// Build the remote tail invocation. `--retry` tolerates the log file not
/// existing yet (the job may still be queued).
pub fn tail_command(log_file: &str) -> String {
    format!("tail --retry -f {}", shell_quote(log_file))
}

/// Spawn the remote tail as a streaming child for the log follower.
pub fn spawn_tail(remote: &str, log_file: &str) -> Result<StreamingChild, ProcessError> {
    StreamingChild::spawn(SSH_COMMAND, &[remote.to_string(), tail_command(log_file)])
}

/// Cancels jobs by running the scheduler's cancel command over ssh.
pub struct SshJobCanceller {
    remote: String,
}

impl SshJobCanceller {
    pub fn new(remote: impl Into<String>) -> Self {
        Self {
            remote: remote.into(),
        }
    }
}

impl JobCanceller for SshJobCanceller {
    fn cancel(&self, job_id: &str) -> Result<(), CancelError> {
        let command = format!("{} {}", CANCEL_COMMAND, shell_quote(job_id));
        let output = ssh_exec(&self.remote, &command, &RunOptions::quiet())?;
        if output.exit_code == 0 {
            Ok(())
        } else {
            Err(CancelError::CommandFailed(output.exit_code))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_shell_command_quotes_arguments() {
        let command = remote_shell_command(
            "~/_remoteexec_srcs/project",
            &["./run".to_string(), "--name".to_string(), "my job".to_string()],
        );
        assert_eq!(
            command,
            "cd ~/_remoteexec_srcs/project && bash -l -c './run --name '\\''my job'\\'''"
        );
    }

    #[test]
    fn test_remote_shell_command_plain_arguments_unquoted() {
        let command = remote_shell_command("~/dir", &["ls".to_string(), "-la".to_string()]);
        assert_eq!(command, "cd ~/dir && bash -l -c 'ls -la'");
    }

    #[test]
    fn test_tail_command() {
        assert_eq!(
            tail_command("/home/u/slurm_logs/123.out"),
            "tail --retry -f /home/u/slurm_logs/123.out"
        );
    }
}
