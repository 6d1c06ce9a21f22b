// ===============================
// src/stage.rs (stage loop, cancellation, backoff)
// ===============================
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::info;

/// Default idle backoff. Shorter means lower pickup latency and more CPU
/// burnt while a queue sits empty or full.
pub const DEFAULT_BACKOFF: Duration = Duration::from_micros(10);

/// Cooperative stop signal shared by the controller and every stage.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Outcome of one unit of stage work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Did something; try again right away.
    Progress,
    /// The queue said "would block"; sleep the stage backoff first.
    Idle,
    /// Did something, but the stage wants to pace itself.
    Pause(Duration),
}

/// Drive `step` until `cancel` fires.
///
/// Cancellation is checked once per iteration, between queue operations,
/// so no push or pop is ever abandoned halfway. Returns the number of
/// iterations run.
pub fn run<F>(name: &str, cancel: &CancelToken, backoff: Duration, mut step: F) -> u64
where
    F: FnMut() -> Step,
{
    info!(stage = name, backoff_us = backoff.as_micros() as u64, "stage started");
    let mut iterations: u64 = 0;
    while !cancel.is_cancelled() {
        iterations += 1;
        match step() {
            Step::Progress => {}
            Step::Idle => thread::sleep(backoff),
            Step::Pause(d) => thread::sleep(d),
        }
    }
    info!(stage = name, iterations, "stage stopped");
    iterations
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stops_once_cancelled_from_inside() {
        let cancel = CancelToken::new();
        let c = cancel.clone();
        let mut n = 0;
        let iters = run("test", &cancel, DEFAULT_BACKOFF, || {
            n += 1;
            if n == 5 {
                c.cancel();
            }
            Step::Progress
        });
        assert_eq!(iters, 5);
        assert!(cancel.is_cancelled());
    }

    #[test]
    fn already_cancelled_runs_nothing() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let iters = run("test", &cancel, DEFAULT_BACKOFF, || panic!("must not run"));
        assert_eq!(iters, 0);
    }

    #[test]
    fn idle_stage_notices_cancel_from_another_thread() {
        let cancel = CancelToken::new();
        let c = cancel.clone();
        let handle = thread::spawn(move || run("idle", &c, Duration::from_micros(50), || Step::Idle));
        thread::sleep(Duration::from_millis(5));
        cancel.cancel();
        let iters = handle.join().unwrap();
        assert!(iters > 0);
    }

    #[test]
    fn idle_sleeps_the_stage_backoff() {
        let cancel = CancelToken::new();
        let c = cancel.clone();
        let handle = thread::spawn(move || run("idle", &c, Duration::from_millis(1), || Step::Idle));
        thread::sleep(Duration::from_millis(20));
        cancel.cancel();
        let iters = handle.join().unwrap();
        // at most one iteration per elapsed millisecond, plus the last partial one
        assert!(iters >= 1 && iters <= 21, "iterations = {iters}");
    }
}
