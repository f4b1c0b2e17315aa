//! Job registration and execution context
//!
//! Jobs are registered explicitly at program start in a [`JobRegistry`];
//! each entry carries the function to run and its [`JobMetadata`]. Lookup
//! by name replaces the attribute scanning a dynamic runtime would do.
//!
//! [`JobContext`] carries the "are we inside a scheduled job" value. It is
//! computed once from the environment at process entry and threaded
//! explicitly through the call chain, never mutated afterwards.

use thiserror::Error;

/// Signature of a job entry point.
///
/// The context tells the function whether it is the scheduled execution or
/// a plain local run; `args` are the pass-through arguments given after
/// `--` on the command line.
pub type JobFn = fn(&JobContext, &[String]) -> Result<(), Box<dyn std::error::Error>>;

/// Static description of a job, fixed at registration time.
#[derive(Debug, Clone)]
pub struct JobMetadata {
    /// Scheduler job name (`--job-name`)
    pub job_name: String,
    /// Shell commands run before the job command (environment activation
    /// and similar), in order, verbatim
    pub pre_run_commands: Vec<String>,
    /// Default scheduler flags for this job, in order
    pub slurm_args: Vec<(String, String)>,
}

impl JobMetadata {
    pub fn new(job_name: impl Into<String>) -> Self {
        Self {
            job_name: job_name.into(),
            pre_run_commands: Vec::new(),
            slurm_args: Vec::new(),
        }
    }

    pub fn with_pre_run_command(mut self, command: impl Into<String>) -> Self {
        self.pre_run_commands.push(command.into());
        self
    }

    pub fn with_slurm_arg(mut self, flag: impl Into<String>, value: impl Into<String>) -> Self {
        self.slurm_args.push((flag.into(), value.into()));
        self
    }
}

/// A registered job: identifier, metadata, and the function to call.
#[derive(Debug)]
pub struct JobEntry {
    pub name: String,
    pub metadata: JobMetadata,
    pub func: JobFn,
}

/// Registry of job entry points, keyed by name.
///
/// Populated by explicit [`JobRegistry::register`] calls at program start.
#[derive(Debug, Default)]
pub struct JobRegistry {
    entries: Vec<JobEntry>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, metadata: JobMetadata, func: JobFn) {
        self.entries.push(JobEntry {
            name: name.into(),
            metadata,
            func,
        });
    }

    pub fn get(&self, name: &str) -> Option<&JobEntry> {
        self.entries.iter().find(|entry| entry.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|entry| entry.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve the entry to run.
    ///
    /// With an explicit name the entry must exist; without one the registry
    /// must contain exactly one job.
    pub fn resolve(&self, requested: Option<&str>) -> Result<&JobEntry, RegistryError> {
        match requested {
            Some(name) => self.get(name).ok_or_else(|| RegistryError::UnknownJob {
                name: name.to_string(),
                available: self.names().join(", "),
            }),
            None => match self.entries.len() {
                0 => Err(RegistryError::Empty),
                1 => Ok(&self.entries[0]),
                _ => Err(RegistryError::Ambiguous {
                    available: self.names().join(", "),
                }),
            },
        }
    }
}

/// Job lookup failure
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("job '{name}' is not registered; available jobs: {available}")]
    UnknownJob { name: String, available: String },

    #[error("multiple jobs registered ({available}); choose one with --job")]
    Ambiguous { available: String },

    #[error("no jobs registered; call JobRegistry::register at program start")]
    Empty,
}

/// Execution context threaded through job functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobContext {
    /// True when this process is the scheduled execution of a job (either
    /// under the scheduler, or a local fallback run standing in for one)
    pub inside_scheduled_job: bool,
}

impl JobContext {
    /// Detect the context from the environment, once, at process entry.
    pub fn from_env() -> Self {
        Self {
            inside_scheduled_job: std::env::var_os("SLURM_JOB_ID").is_some(),
        }
    }

    /// Context for executing the job function in this process.
    pub fn execution() -> Self {
        Self {
            inside_scheduled_job: true,
        }
    }

    /// Context for the submitting side.
    pub fn submission() -> Self {
        Self {
            inside_scheduled_job: false,
        }
    }
}
