//! remoteexec - run your project on a remote machine
//!
//! This crate provides two developer utilities:
//!
//! - The `remoteexec` binary copies a local project tree to a remote host
//!   with rsync and executes a command there over ssh. When the remote
//!   command submits a batch job, the submission summary is picked up and
//!   the job's log file is followed interactively.
//! - The [`runner`] module turns a binary into a batch-job launcher: jobs
//!   are registered in a [`JobRegistry`] at program start, and
//!   [`runner::run`] either submits the selected job to the scheduler
//!   (rendering and `sbatch`-ing a script) or executes it in place.

pub mod config;
pub mod follow;
pub mod job;
pub mod process;
pub mod remote;
pub mod runner;
pub mod script;
pub mod submit;

pub use follow::{FollowController, FollowOutcome, InterruptState};
pub use job::{JobContext, JobEntry, JobMetadata, JobRegistry};
pub use script::{DirectiveSet, LOG_EOF_SENTINEL};
pub use submit::{JobCanceller, SubmissionResult};
