//! Minimal job-bearing binary: registers one job and hands control to the
//! runner. Sync it to a cluster with remoteexec and run it there:
//!
//! ```text
//! remoteexec --remote cluster -- ./target/release/slurm-hello
//! ```

use remoteexec::job::{JobContext, JobMetadata, JobRegistry};
use remoteexec::runner;

fn hello(context: &JobContext, args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    if context.inside_scheduled_job {
        println!("Hello from the compute node!");
    } else {
        println!("Hello from a local run!");
    }
    if !args.is_empty() {
        println!("Arguments: {}", args.join(" "));
    }
    Ok(())
}

fn main() {
    let mut registry = JobRegistry::new();
    registry.register(
        "hello",
        JobMetadata::new("hello")
            .with_slurm_arg("--time", "00:05:00")
            .with_slurm_arg("--mem", "1G")
            .with_pre_run_command("echo \"preparing environment\""),
        hello,
    );
    std::process::exit(runner::run(&registry));
}
