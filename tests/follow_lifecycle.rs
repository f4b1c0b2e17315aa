//! Log-follow lifecycle tests
//!
//! Drives the follower against real `sh` child processes standing in for
//! the remote tail, with interrupts injected directly into the
//! InterruptState (the same path the ctrlc handler uses).

use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use remoteexec::follow::{self, FollowOptions, FollowOutcome, InterruptState};
use remoteexec::process::StreamingChild;
use remoteexec::script::{shell_quote, LOG_EOF_SENTINEL};
use remoteexec::submit::{CancelError, JobCanceller};

struct RecordingCanceller {
    calls: Mutex<Vec<String>>,
    fail: bool,
}

impl RecordingCanceller {
    fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    fn failing() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl JobCanceller for RecordingCanceller {
    fn cancel(&self, job_id: &str) -> Result<(), CancelError> {
        self.calls.lock().unwrap().push(job_id.to_string());
        if self.fail {
            Err(CancelError::CommandFailed(1))
        } else {
            Ok(())
        }
    }
}

fn spawn_sh(script: &str) -> StreamingChild {
    StreamingChild::spawn("sh", &["-c".to_string(), script.to_string()]).expect("sh should spawn")
}

fn options(grace_ms: u64) -> FollowOptions {
    FollowOptions {
        grace_period: Duration::from_millis(grace_ms),
        poll_interval: Duration::from_millis(10),
    }
}

#[test]
fn test_sentinel_completes_the_follow() {
    let tail = spawn_sh(&format!(
        "echo start; echo {}; echo straggler",
        shell_quote(LOG_EOF_SENTINEL)
    ));
    let interrupts = InterruptState::new();
    let canceller = RecordingCanceller::new();

    let outcome = follow::follow_log(tail, "777", &interrupts, &canceller, &options(500));

    assert_eq!(outcome, FollowOutcome::Completed);
    assert!(canceller.calls().is_empty());
}

#[test]
fn test_stream_close_without_sentinel_completes() {
    let tail = spawn_sh("echo only line");
    let interrupts = InterruptState::new();
    let canceller = RecordingCanceller::new();

    let outcome = follow::follow_log(tail, "777", &interrupts, &canceller, &options(500));

    assert_eq!(outcome, FollowOutcome::Completed);
    assert!(canceller.calls().is_empty());
}

#[test]
fn test_interrupt_then_grace_expiry_leaves_job_running() {
    let tail = spawn_sh("sleep 5");
    let interrupts = InterruptState::new();
    let canceller = RecordingCanceller::new();

    interrupts.notify();
    let outcome = follow::follow_log(tail, "777", &interrupts, &canceller, &options(50));

    assert_eq!(outcome, FollowOutcome::LeftRunning);
    assert!(canceller.calls().is_empty());
}

#[test]
fn test_second_interrupt_before_grace_cancels_with_job_id() {
    let tail = spawn_sh("sleep 5");
    let interrupts = InterruptState::new();
    let canceller = RecordingCanceller::new();

    interrupts.notify();
    let outcome = thread::scope(|scope| {
        scope.spawn(|| {
            thread::sleep(Duration::from_millis(50));
            interrupts.notify();
        });
        follow::follow_log(tail, "4242", &interrupts, &canceller, &options(1000))
    });

    assert_eq!(outcome, FollowOutcome::Cancelled);
    assert_eq!(canceller.calls(), vec!["4242".to_string()]);
}

#[test]
fn test_failed_cancel_reports_cancel_failed() {
    let tail = spawn_sh("sleep 5");
    let interrupts = InterruptState::new();
    let canceller = RecordingCanceller::failing();

    interrupts.notify();
    interrupts.notify();
    let outcome = follow::follow_log(tail, "4242", &interrupts, &canceller, &options(1000));

    assert_eq!(outcome, FollowOutcome::CancelFailed);
    assert_eq!(canceller.calls(), vec!["4242".to_string()]);
}
