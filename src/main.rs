//! remoteexec CLI
//!
//! Copies a local project tree to a remote host with rsync, executes a
//! command there over ssh, and, when the remote command submitted a batch
//! job, follows the job's log file until it completes, is detached from,
//! or the job is cancelled.

use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use remoteexec::config::Config;
use remoteexec::follow::{self, FollowOptions, FollowOutcome, InterruptState};
use remoteexec::process::{print_frame_close, print_frame_top, RunOptions};
use remoteexec::remote::{self, SshJobCanceller};
use remoteexec::script;
use remoteexec::submit::{self, SubmissionResult};

#[derive(Parser)]
#[command(
    name = "remoteexec",
    about = "Sync a project to a remote host, run a command there, and follow batch job logs",
    version
)]
struct Cli {
    /// SSH destination of the remote host (overrides the config file)
    #[arg(long)]
    remote: Option<String>,

    /// Local directory to copy to the remote host (default: current directory)
    #[arg(long)]
    parent: Option<PathBuf>,

    /// Destination directory on the remote host
    #[arg(long)]
    dst: Option<String>,

    /// Show rsync output
    #[arg(short, long)]
    verbose: bool,

    /// Command to execute on the remote host (after `--`)
    #[arg(last = true, required = true)]
    command: Vec<String>,
}

fn main() {
    let cli = Cli::parse();

    let config = match Config::load_default() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Error loading config: {}", err);
            process::exit(1);
        }
    };

    let remote_host = match cli.remote.clone().or_else(|| config.remote.clone()) {
        Some(remote) => remote,
        None => {
            eprintln!("No remote host given; pass --remote or set `remote` in the config file.");
            process::exit(1);
        }
    };

    let parent = cli.parent.clone().unwrap_or_else(|| PathBuf::from("."));
    let parent = match parent.canonicalize() {
        Ok(parent) => parent,
        Err(err) => {
            eprintln!(
                "Parent directory {} is not accessible: {}",
                parent.display(),
                err
            );
            process::exit(1);
        }
    };
    let parent_name = match parent.file_name().and_then(|name| name.to_str()) {
        Some(name) => name.to_string(),
        None => {
            eprintln!("Cannot determine directory name of {}", parent.display());
            process::exit(1);
        }
    };

    let dst = cli.dst.clone().unwrap_or_else(|| config.destination_dir.clone());

    sync_project(&cli, &config, &parent, &remote_host, &dst);

    let dir_on_remote = format!("{}/{}", dst.trim_end_matches('/'), parent_name);
    let command = remote::remote_shell_command(&dir_on_remote, &cli.command);
    let title = format!(
        "[{}:{}] > {}",
        remote_host,
        dir_on_remote,
        cli.command.join(" ")
    );
    let output = match remote::ssh_exec(&remote_host, &command, &RunOptions::titled(title)) {
        Ok(output) => output,
        Err(err) => {
            eprintln!("Remote execution failed: {}", err);
            process::exit(1);
        }
    };

    // A submitting remote command ends with a one-line JSON summary; a
    // plain command does not, and its exit code is simply propagated.
    let Some(result) = submit::find_summary(&output.lines) else {
        // Negative codes mean the remote command died on a signal.
        process::exit(if output.exit_code < 0 { 1 } else { output.exit_code });
    };

    let code = handle_submission(&remote_host, &config, &result);
    process::exit(code);
}

fn sync_project(cli: &Cli, config: &Config, parent: &PathBuf, remote_host: &str, dst: &str) {
    let destination = format!("{}:{}", remote_host, dst);
    if !cli.verbose {
        print!("Copying {} to {} ...", parent.display(), destination);
        let _ = std::io::stdout().flush();
    }

    let options = if cli.verbose {
        RunOptions::titled(format!("Syncing {} to {}", parent.display(), destination))
    } else {
        RunOptions::quiet()
    };

    match remote::rsync(parent, &destination, &config.rsync_excludes, &options) {
        Ok(output) if output.exit_code == 0 => {
            if !cli.verbose {
                println!(" done");
            }
        }
        Ok(output) => {
            if !cli.verbose {
                println!();
            }
            eprintln!("rsync exited with code {}", output.exit_code);
            process::exit(output.exit_code.max(1));
        }
        Err(err) => {
            if !cli.verbose {
                println!();
            }
            eprintln!("rsync failed: {}", err);
            process::exit(1);
        }
    }
}

fn handle_submission(remote_host: &str, config: &Config, result: &SubmissionResult) -> i32 {
    if !result.success {
        eprintln!("Job submission failed: {}", result.message);
        return 1;
    }
    if result.is_array_task {
        println!("Submitted an array task; log following is not available for array jobs.");
        return 0;
    }
    let (job_id, log_file) = match (result.job_id.as_deref(), result.log_file.as_deref()) {
        (Some(job_id), Some(log_file)) => (job_id, log_file),
        _ => {
            eprintln!("Submission succeeded but no job id or log file was reported.");
            return 1;
        }
    };
    if script::has_unresolved_tokens(log_file) {
        eprintln!(
            "Log path {} still contains scheduler tokens; refusing to follow it.",
            log_file
        );
        return 1;
    }

    println!();
    println!(
        "Following log of job {} ({}:{})",
        job_id, remote_host, log_file
    );
    println!("Press Ctrl+C once to detach and leave the job running.");
    println!("Press Ctrl+C twice to detach and cancel the job.");
    println!();

    let interrupts = Arc::new(InterruptState::new());
    if let Err(err) = InterruptState::install(Arc::clone(&interrupts)) {
        eprintln!("Failed to install interrupt handler: {}", err);
        return 1;
    }

    let tail = match remote::spawn_tail(remote_host, log_file) {
        Ok(tail) => tail,
        Err(err) => {
            eprintln!("Failed to start remote tail: {}", err);
            return 1;
        }
    };

    let canceller = SshJobCanceller::new(remote_host);
    let options = FollowOptions {
        grace_period: Duration::from_secs(config.grace_seconds),
        ..Default::default()
    };

    print_frame_top(None);
    let outcome = follow::follow_log(tail, job_id, &interrupts, &canceller, &options);
    print_frame_close();

    match outcome {
        FollowOutcome::Completed => 0,
        FollowOutcome::LeftRunning => 0,
        FollowOutcome::Cancelled => 0,
        FollowOutcome::CancelFailed => 1,
    }
}
