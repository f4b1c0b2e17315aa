//! Submission-side orchestration
//!
//! [`run`] is the entry point that job-bearing binaries hand control to
//! after registering their jobs:
//!
//! ```no_run
//! use remoteexec::job::{JobContext, JobMetadata, JobRegistry};
//!
//! fn train(_: &JobContext, _: &[String]) -> Result<(), Box<dyn std::error::Error>> {
//!     Ok(())
//! }
//!
//! let mut registry = JobRegistry::new();
//! registry.register("train", JobMetadata::new("train"), train);
//! std::process::exit(remoteexec::runner::run(&registry));
//! ```
//!
//! Depending on where the process runs, `run` either executes the job
//! function directly (inside a scheduled job, or as a local fallback when
//! no scheduler is present) or renders a batch script, submits it, and
//! prints the submission summary as a final JSON line for the controlling
//! `remoteexec` process to parse.

use clap::Parser;
use std::env;
use std::fs;
use std::path::PathBuf;
use thiserror::Error;

use crate::config::{self, Config, ConfigError};
use crate::job::{JobContext, JobEntry, JobRegistry, RegistryError};
use crate::script::{self, shell_quote, DirectiveSet};
use crate::submit::{self, SubmissionResult};

/// Log file template for array tasks: parent job id + array task id.
const ARRAY_OUTPUT_TEMPLATE: &str = "%A_%a.out";

/// Log file template for plain jobs: job id.
const OUTPUT_TEMPLATE: &str = "%j.out";

/// Command line of a job-bearing binary
#[derive(Debug, Parser)]
#[command(about = "Run a registered job, submitting it to the scheduler when available")]
pub struct RunnerCli {
    /// Name of the registered job to run (required when more than one job
    /// is registered)
    #[arg(long)]
    pub job: Option<String>,

    /// Run the job locally even if a scheduler is available
    #[arg(long)]
    pub local: bool,

    /// Extra scheduler directive as FLAG=VALUE, e.g. --sbatch --mem=16G
    /// (repeatable; overrides the job's registered defaults)
    #[arg(long = "sbatch", value_name = "FLAG=VALUE")]
    pub sbatch_args: Vec<String>,

    /// Arguments passed through to the job function (after `--`)
    #[arg(last = true)]
    pub job_args: Vec<String>,
}

/// Orchestration failure
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid --sbatch argument '{0}': expected FLAG=VALUE")]
    InvalidSbatchArg(String),

    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write batch script {path}: {source}")]
    WriteScript {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("job '{job}' failed: {message}")]
    JobFailed { job: String, message: String },
}

/// Parse the command line and run the selected job. Returns the process
/// exit code.
pub fn run(registry: &JobRegistry) -> i32 {
    run_with(registry, RunnerCli::parse())
}

/// Run with an already-parsed command line.
pub fn run_with(registry: &JobRegistry, cli: RunnerCli) -> i32 {
    match try_run(registry, &cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{}", err);
            1
        }
    }
}

fn try_run(registry: &JobRegistry, cli: &RunnerCli) -> Result<i32, RunnerError> {
    let entry = registry.resolve(cli.job.as_deref())?;

    let context = JobContext::from_env();
    if context.inside_scheduled_job {
        return execute(entry, &context, &cli.job_args);
    }

    if cli.local {
        announce_local_run(entry, &cli.sbatch_args, "requested with --local");
        return execute(entry, &JobContext::execution(), &cli.job_args);
    }

    if !submit::scheduler_available() {
        announce_local_run(entry, &cli.sbatch_args, "no scheduler detected on this host");
        return execute(entry, &JobContext::execution(), &cli.job_args);
    }

    let config = Config::load_default()?;
    let mut directives = build_directives(entry, &cli.sbatch_args)?;

    let is_array_task = directives.is_array_task();
    let log_dir = config::expand_home(&config.log_dir);
    fs::create_dir_all(&log_dir).map_err(|source| RunnerError::CreateDir {
        path: log_dir.clone(),
        source,
    })?;
    let template = if is_array_task {
        ARRAY_OUTPUT_TEMPLATE
    } else {
        OUTPUT_TEMPLATE
    };
    let output_file = log_dir.join(template).display().to_string();
    directives.set("--output", output_file.clone());
    directives.set("--error", output_file);

    let argv0 = env::args().next().unwrap_or_else(|| "job".to_string());
    let exec_command = reexec_command_line(&argv0, entry, &cli.job_args);
    let script_text = script::build_script(&entry.metadata, &directives, &exec_command);

    let script_dir = PathBuf::from(&config.script_dir);
    fs::create_dir_all(&script_dir).map_err(|source| RunnerError::CreateDir {
        path: script_dir.clone(),
        source,
    })?;
    let script_file = script_dir.join(format!("{}.slurm", entry.metadata.job_name));
    fs::write(&script_file, script_text).map_err(|source| RunnerError::WriteScript {
        path: script_file.clone(),
        source,
    })?;

    let result = submit::submit(&script_file, &directives);
    report(&result);

    // The summary must be the last line of output; the controlling
    // remoteexec process scans the ssh stream from the end for it.
    match serde_json::to_string(&result) {
        Ok(line) => println!("{}", line),
        Err(err) => eprintln!("Failed to serialize submission summary: {}", err),
    }

    Ok(if result.success { 0 } else { 1 })
}

fn execute(entry: &JobEntry, context: &JobContext, args: &[String]) -> Result<i32, RunnerError> {
    match (entry.func)(context, args) {
        Ok(()) => Ok(0),
        Err(err) => Err(RunnerError::JobFailed {
            job: entry.name.clone(),
            message: err.to_string(),
        }),
    }
}

fn announce_local_run(entry: &JobEntry, sbatch_args: &[String], reason: &str) {
    eprintln!();
    eprintln!("*** Running job '{}' locally ({})", entry.name, reason);
    if !entry.metadata.pre_run_commands.is_empty() {
        eprintln!(
            "*** Ignoring pre-run commands: {}",
            entry.metadata.pre_run_commands.join("; ")
        );
    }
    if !sbatch_args.is_empty() {
        eprintln!("*** Ignoring scheduler arguments: {}", sbatch_args.join(" "));
    }
    eprintln!();
}

/// Build the directive set for an entry: job name first, then the job's
/// registered defaults, then command-line overrides.
pub fn build_directives(
    entry: &JobEntry,
    sbatch_args: &[String],
) -> Result<DirectiveSet, RunnerError> {
    let mut directives = DirectiveSet::new();
    directives.set("--job-name", entry.metadata.job_name.clone());
    for (flag, value) in &entry.metadata.slurm_args {
        directives.set(flag.clone(), value.clone());
    }
    for raw in sbatch_args {
        let (flag, value) = raw
            .split_once('=')
            .ok_or_else(|| RunnerError::InvalidSbatchArg(raw.clone()))?;
        directives.set(flag, value);
    }
    Ok(directives)
}

/// Command line that re-invokes the submitting binary on the compute node.
///
/// The scheduler starts the job in the submission directory, so a relative
/// argv[0] resolves to the same binary there.
fn reexec_command_line(argv0: &str, entry: &JobEntry, job_args: &[String]) -> String {
    let mut parts = vec![
        shell_quote(argv0),
        "--job".to_string(),
        shell_quote(&entry.name),
    ];
    if !job_args.is_empty() {
        parts.push("--".to_string());
        parts.extend(job_args.iter().map(|arg| shell_quote(arg)));
    }
    parts.join(" ")
}

fn report(result: &SubmissionResult) {
    if result.success {
        println!("{}", result.message);
        println!("Script file: {}", result.script_file);
        if let Some(ref log_file) = result.log_file {
            println!("Log file: {}", log_file);
        }
    } else {
        println!("Failed to submit batch job: {}", result.message);
        println!("Script file: {}", result.script_file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobMetadata;

    fn noop(_: &JobContext, _: &[String]) -> Result<(), Box<dyn std::error::Error>> {
        Ok(())
    }

    fn entry() -> JobEntry {
        JobEntry {
            name: "train".to_string(),
            metadata: JobMetadata::new("train")
                .with_slurm_arg("--time", "01:00:00")
                .with_slurm_arg("--mem", "8G"),
            func: noop,
        }
    }

    #[test]
    fn test_build_directives_defaults_and_overrides() {
        let directives = build_directives(
            &entry(),
            &["--mem=16G".to_string(), "--gres=gpu:1".to_string()],
        )
        .expect("valid args");

        assert_eq!(directives.get("--job-name"), Some("train"));
        assert_eq!(directives.get("--time"), Some("01:00:00"));
        // The command-line value replaces the registered default.
        assert_eq!(directives.get("--mem"), Some("16G"));
        assert_eq!(directives.get("--gres"), Some("gpu:1"));
    }

    #[test]
    fn test_build_directives_rejects_flag_without_value() {
        let err = build_directives(&entry(), &["--mem".to_string()]).unwrap_err();
        assert!(matches!(err, RunnerError::InvalidSbatchArg(_)));
        assert!(err.to_string().contains("--mem"));
    }

    #[test]
    fn test_reexec_command_line_quotes_arguments() {
        let command = reexec_command_line(
            "./target/release/train",
            &entry(),
            &["--epochs".to_string(), "10".to_string(), "two words".to_string()],
        );
        assert_eq!(
            command,
            "./target/release/train --job train -- --epochs 10 'two words'"
        );
    }

    #[test]
    fn test_reexec_command_line_without_job_args() {
        let command = reexec_command_line("train", &entry(), &[]);
        assert_eq!(command, "train --job train");
    }
}
