//! Interactive log following with interrupt-driven detach and cancel
//!
//! After a successful non-array submission the log file is tailed until
//! the sentinel line written by the generated script appears. Interrupts
//! drive an explicit state machine:
//!
//! - Following: each line is scanned for the sentinel; tail-utility noise
//!   is filtered from the printed stream.
//! - First interrupt: detach. Reading stops, the remote job keeps running,
//!   and a grace timer starts.
//! - Grace timer expires: the follower exits, leaving the job running.
//! - Second interrupt before the timer expires: the job is cancelled via
//!   the scheduler's cancel command.
//!
//! The state machine is advanced by cooperative checks between bounded
//! reads rather than by exception-style control transfer, so a signal is
//! observed within one poll interval even when the log is quiet.
//!
//! The sentinel is the only completion signal. A job killed externally
//! never writes it, so an unattended follower would retry indefinitely;
//! detaching is the way out.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::process::{self, LinePoll, StreamingChild};
use crate::script::LOG_EOF_SENTINEL;
use crate::submit::JobCanceller;

/// Default wait between first and second interrupt before leaving the job
/// running.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(3);

/// Default poll interval for reads and interrupt checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Prefix of transient warnings emitted by the remote tail utility while
/// the log file does not exist yet. Filtered from the printed stream.
pub const TAIL_NOISE_PREFIX: &str = "tail: warning: ";

/// Counter of delivered interrupt signals, fed by the ctrlc handler.
#[derive(Debug, Default)]
pub struct InterruptState {
    count: AtomicU8,
}

impl InterruptState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one interrupt. Saturates instead of wrapping.
    pub fn notify(&self) {
        let _ = self
            .count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
                if count == u8::MAX {
                    None
                } else {
                    Some(count + 1)
                }
            });
    }

    pub fn count(&self) -> u8 {
        self.count.load(Ordering::SeqCst)
    }

    /// Install the process-wide interrupt handler. Call once at startup.
    pub fn install(state: Arc<InterruptState>) -> Result<(), ctrlc::Error> {
        ctrlc::set_handler(move || state.notify())
    }
}

/// Phase of the follow lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowPhase {
    /// Tailing the log, scanning for the sentinel
    Following,
    /// First interrupt received; grace timer running
    Detached,
    /// Terminal; see [`FollowController::outcome`]
    Done,
}

/// Terminal outcome of a follow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowOutcome {
    /// Sentinel seen (or the stream closed); the job finished
    Completed,
    /// Detached; the job keeps running in the background
    LeftRunning,
    /// Cancel request accepted
    Cancelled,
    /// Cancel request failed; the job is presumed still running
    CancelFailed,
}

/// What to do with a log line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineAction {
    Print,
    Suppress,
    /// Sentinel seen: stop the tail and finish
    Finish,
}

/// Reaction to an interrupt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptAction {
    /// Stop reading, start the grace timer
    Detach,
    /// Issue the cancel command
    Cancel,
    Ignore,
}

/// Explicit state machine for the follow lifecycle.
///
/// Pure transitions; the IO loop in [`follow_log`] feeds it lines, ticks,
/// and interrupts.
#[derive(Debug)]
pub struct FollowController {
    phase: FollowPhase,
    outcome: Option<FollowOutcome>,
    grace_period: Duration,
    grace_deadline: Option<Instant>,
}

impl FollowController {
    pub fn new(grace_period: Duration) -> Self {
        Self {
            phase: FollowPhase::Following,
            outcome: None,
            grace_period,
            grace_deadline: None,
        }
    }

    pub fn phase(&self) -> FollowPhase {
        self.phase
    }

    pub fn outcome(&self) -> Option<FollowOutcome> {
        self.outcome
    }

    /// Classify a log line. Only meaningful while Following; afterwards
    /// every line is suppressed, so the sentinel terminates exactly once.
    pub fn on_line(&mut self, line: &str) -> LineAction {
        if self.phase != FollowPhase::Following {
            return LineAction::Suppress;
        }
        if line.trim() == LOG_EOF_SENTINEL {
            self.phase = FollowPhase::Done;
            self.outcome = Some(FollowOutcome::Completed);
            return LineAction::Finish;
        }
        if line.starts_with(TAIL_NOISE_PREFIX) {
            LineAction::Suppress
        } else {
            LineAction::Print
        }
    }

    /// Advance the state machine on an interrupt.
    pub fn on_interrupt(&mut self, now: Instant) -> InterruptAction {
        match self.phase {
            FollowPhase::Following => {
                self.phase = FollowPhase::Detached;
                self.grace_deadline = Some(now + self.grace_period);
                InterruptAction::Detach
            }
            FollowPhase::Detached => {
                self.phase = FollowPhase::Done;
                InterruptAction::Cancel
            }
            FollowPhase::Done => InterruptAction::Ignore,
        }
    }

    /// Check the grace timer. Returns true when it has just expired,
    /// moving to the LeftRunning outcome.
    pub fn grace_expired(&mut self, now: Instant) -> bool {
        if self.phase == FollowPhase::Detached {
            if let Some(deadline) = self.grace_deadline {
                if now >= deadline {
                    self.phase = FollowPhase::Done;
                    self.outcome = Some(FollowOutcome::LeftRunning);
                    return true;
                }
            }
        }
        false
    }

    /// The tail stream closed without a sentinel (connection or remote
    /// tail ended); treat the follow as complete.
    pub fn on_stream_closed(&mut self) {
        if self.phase == FollowPhase::Following {
            self.phase = FollowPhase::Done;
            self.outcome = Some(FollowOutcome::Completed);
        }
    }

    /// Record the result of an issued cancel request.
    pub fn record_cancel_result(&mut self, cancelled: bool) {
        self.outcome = Some(if cancelled {
            FollowOutcome::Cancelled
        } else {
            FollowOutcome::CancelFailed
        });
    }
}

/// Timing options for [`follow_log`]
#[derive(Debug, Clone)]
pub struct FollowOptions {
    pub grace_period: Duration,
    pub poll_interval: Duration,
}

impl Default for FollowOptions {
    fn default() -> Self {
        Self {
            grace_period: DEFAULT_GRACE_PERIOD,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Drive a spawned tail process through the follow lifecycle.
///
/// Blocks until a terminal outcome is reached. Interrupts recorded in
/// `interrupts` are observed between reads, within one poll interval.
pub fn follow_log(
    mut tail: StreamingChild,
    job_id: &str,
    interrupts: &InterruptState,
    canceller: &dyn JobCanceller,
    options: &FollowOptions,
) -> FollowOutcome {
    let mut controller = FollowController::new(options.grace_period);
    let mut delivered: u8 = 0;

    loop {
        let pending = interrupts.count();
        while delivered < pending && controller.phase() != FollowPhase::Done {
            delivered += 1;
            match controller.on_interrupt(Instant::now()) {
                InterruptAction::Detach => {
                    tail.terminate();
                    eprintln!();
                    eprintln!(
                        "Detached from log. Press Ctrl+C again within {}s to cancel job {}; \
                         otherwise it keeps running.",
                        options.grace_period.as_secs(),
                        job_id
                    );
                }
                InterruptAction::Cancel => {
                    eprintln!("Cancelling job {}...", job_id);
                    match canceller.cancel(job_id) {
                        Ok(()) => {
                            eprintln!("Job {} cancelled.", job_id);
                            controller.record_cancel_result(true);
                        }
                        Err(err) => {
                            eprintln!("Failed to cancel job {}: {}", job_id, err);
                            controller.record_cancel_result(false);
                        }
                    }
                }
                InterruptAction::Ignore => {}
            }
        }

        match controller.phase() {
            FollowPhase::Done => break,
            FollowPhase::Detached => {
                if controller.grace_expired(Instant::now()) {
                    eprintln!("Leaving job {} running in the background.", job_id);
                    break;
                }
                thread::sleep(options.poll_interval);
            }
            FollowPhase::Following => match tail.next_line(options.poll_interval) {
                LinePoll::Line(line) => match controller.on_line(&line) {
                    LineAction::Print => process::print_frame_line(&line),
                    LineAction::Suppress => {}
                    LineAction::Finish => tail.terminate(),
                },
                LinePoll::Idle => {}
                LinePoll::Closed => controller.on_stream_closed(),
            },
        }
    }

    let _ = tail.wait();
    controller.outcome().unwrap_or(FollowOutcome::Completed)
}
