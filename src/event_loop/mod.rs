//! Event Loop Implementation
//!
//! This module drives timers and microtasks to completion with the ordering
//! a script author expects:
//!
//! 1. Microtasks queued by top-level code run before any timer.
//! 2. Due timers fire in `(due_at, registration order)` order.
//! 3. After every timer callback the microtask queue is drained to empty
//!    before the next timer in the same batch runs.
//! 4. A timer cancelled by an earlier callback in the same batch does not
//!    fire.
//!
//! The loop is single-threaded and cooperative: exactly one callback runs
//! at a time and suspension only happens between callbacks.

mod invoker;
mod microtask;
mod scheduler;
mod timers;

pub use invoker::{ErrorHook, ErrorSource, Invoker, InvokerCounters, UnhandledError};
pub use microtask::{Microtask, MicrotaskQueue};
pub use scheduler::Scheduler;
pub use timers::{DueTimer, TimerCallback, TimerHandle, TimerRegistry};

use serde::Serialize;
use std::fmt;
use tracing::{debug, trace};

use crate::clock::{Clock, ClockKind, LoopWaker, SystemClock, Timestamp, VirtualClock};
use crate::config::LoopConfig;
use crate::error::{CallbackResult, Error, Result};

/// Lifecycle of an [`EventLoop`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Created, nothing has run yet
    Idle,
    /// Executing script code or a due-batch of timers
    Running,
    /// Running the microtasks queued by top-level code
    DrainingInitialMicrotasks,
    /// Blocked until the next timer is due or the loop is woken
    Waiting,
    /// No pending timers and no queued microtasks; the loop is done
    Terminated,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopState::Idle => write!(f, "Idle"),
            LoopState::Running => write!(f, "Running"),
            LoopState::DrainingInitialMicrotasks => write!(f, "DrainingInitialMicrotasks"),
            LoopState::Waiting => write!(f, "Waiting"),
            LoopState::Terminated => write!(f, "Terminated"),
        }
    }
}

/// Result of running the event loop to completion via [`EventLoop::run`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunResult {
    /// Total number of microtasks that were dequeued and processed
    pub microtasks_processed: u64,
    /// Timer callbacks invoked (each firing of an interval counts once)
    pub timers_fired: u64,
    /// Number of due-batches processed
    pub iterations: u64,
    /// Unhandled errors reported to the embedder
    pub errors: u64,
    /// Loop time when the event loop finished
    pub final_time: Timestamp,
}

/// Runtime statistics for the event loop, cumulative across scripts and runs
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct EventLoopStats {
    /// Script, timer and microtask callbacks invoked
    pub total_callbacks: u64,
    /// Total microtasks processed
    pub total_microtasks: u64,
    /// Total timer callbacks invoked
    pub total_timers_fired: u64,
    /// Total due-batches processed
    pub total_ticks: u64,
    /// Times the loop blocked waiting for a timer
    pub total_waits: u64,
    /// Maximum microtasks drained in a single checkpoint
    pub max_microtasks_per_drain: u64,
    /// Timers ever scheduled
    pub timers_scheduled: u64,
    /// Live timers cancelled before firing out
    pub timers_cancelled: u64,
    /// Unhandled errors reported to the embedder
    pub unhandled_errors: u64,
}

/// The event loop manages the timer registry, the microtask queue and the
/// order in which script callbacks run.
pub struct EventLoop {
    scheduler: Scheduler,
    invoker: Invoker,
    state: LoopState,
    waker: LoopWaker,
    timers_fired: u64,
    ticks: u64,
    waits: u64,
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLoop {
    /// Create an event loop on the system clock with default settings
    pub fn new() -> Self {
        Self::with_clock(SystemClock::new())
    }

    /// Create an event loop driven by `clock`
    pub fn with_clock(clock: impl Clock + 'static) -> Self {
        Self::build(clock, &LoopConfig::default())
    }

    /// Create an event loop from configuration, choosing the clock it names
    pub fn with_config(config: &LoopConfig) -> Self {
        match config.clock {
            ClockKind::System => Self::build(SystemClock::new(), config),
            ClockKind::Virtual => Self::build(VirtualClock::new(), config),
        }
    }

    /// Create an event loop with an explicit clock; the configured clock
    /// kind is ignored
    pub fn with_clock_and_config(clock: impl Clock + 'static, config: &LoopConfig) -> Self {
        Self::build(clock, config)
    }

    fn build(clock: impl Clock + 'static, config: &LoopConfig) -> Self {
        Self {
            scheduler: Scheduler::new(clock),
            invoker: Invoker::new(config.report_errors_to_log, config.max_microtasks_per_drain),
            state: LoopState::Idle,
            waker: LoopWaker::new(),
            timers_fired: 0,
            ticks: 0,
            waits: 0,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> LoopState {
        self.state
    }

    /// The scheduling API, for an embedder registering work from outside
    /// any callback
    pub fn scheduler(&mut self) -> &mut Scheduler {
        &mut self.scheduler
    }

    /// Current loop time
    pub fn now(&mut self) -> Timestamp {
        self.scheduler.now()
    }

    /// A handle that can wake this loop from another thread while it waits
    pub fn waker(&self) -> LoopWaker {
        self.waker.clone()
    }

    /// Install the hook that receives every unhandled callback error
    pub fn on_unhandled_error<F>(&mut self, hook: F)
    where
        F: FnMut(&UnhandledError) + 'static,
    {
        self.invoker.set_hook(Box::new(hook));
    }

    /// Check if the event loop has any pending work
    pub fn has_pending_work(&self) -> bool {
        self.scheduler.pending_timers() > 0 || self.scheduler.pending_microtasks() > 0
    }

    /// Run top-level script code through the invoker: an error it returns is
    /// reported like any other callback error, and the microtasks it queued
    /// run before this returns.
    pub fn run_script<F>(&mut self, script: F) -> Result<()>
    where
        F: FnOnce(&mut Scheduler) -> CallbackResult,
    {
        self.ensure_runnable()?;
        self.set_state(LoopState::Running);
        self.invoker.call_script(&mut self.scheduler, script);
        self.drain_initial_microtasks();
        self.bail_if_fatal()
    }

    /// Run `script`, then the loop until it terminates
    pub fn run_main<F>(&mut self, script: F) -> Result<RunResult>
    where
        F: FnOnce(&mut Scheduler) -> CallbackResult,
    {
        let before = self.snapshot();
        self.run_script(script)?;
        self.run_loop(before)
    }

    /// Drain everything until quiescent.
    ///
    /// Returns once no timers remain and the microtask queue is empty.
    /// Fails only on a broken scheduler invariant (clock regression,
    /// duplicate handle, exhausted microtask budget), after which the loop
    /// is terminated.
    pub fn run(&mut self) -> Result<RunResult> {
        self.ensure_runnable()?;
        let before = self.snapshot();
        self.run_loop(before)
    }

    fn run_loop(&mut self, before: Progress) -> Result<RunResult> {
        self.set_state(LoopState::Running);
        self.drain_initial_microtasks();

        loop {
            self.bail_if_fatal()?;

            if self.scheduler.pending_microtasks() > 0 {
                self.invoker.drain_microtasks(&mut self.scheduler);
                self.bail_if_fatal()?;
            }

            let Some(next_due) = self.scheduler.timers_mut().next_due_at() else {
                if self.scheduler.pending_microtasks() == 0 {
                    break;
                }
                continue;
            };

            let now = self.scheduler.now();
            self.bail_if_fatal()?;

            if next_due <= now {
                self.set_state(LoopState::Running);
                self.fire_due(now)?;
            } else {
                self.set_state(LoopState::Waiting);
                trace!(until = %next_due, "waiting for next timer");
                self.waits += 1;
                self.scheduler.sleep_until(next_due, &self.waker);
            }
        }

        self.set_state(LoopState::Terminated);
        let after = self.snapshot();
        Ok(RunResult {
            microtasks_processed: after.microtasks - before.microtasks,
            timers_fired: after.timers_fired - before.timers_fired,
            iterations: after.ticks - before.ticks,
            errors: after.errors - before.errors,
            final_time: self.scheduler.now(),
        })
    }

    /// Fire one due-batch. The batch is a snapshot, and every member is
    /// re-validated right before its callback runs.
    fn fire_due(&mut self, now: Timestamp) -> Result<()> {
        let batch = self.scheduler.timers_mut().pop_due(now);
        debug!(at = %now, timers = batch.len(), "firing due batch");
        self.ticks += 1;

        for due in batch {
            let Some(callback) = self.scheduler.timers_mut().begin_fire(&due) else {
                trace!(handle = %due.handle, "skipping timer cancelled within its batch");
                continue;
            };
            self.timers_fired += 1;
            let callback = self
                .invoker
                .invoke_timer(&mut self.scheduler, due.handle, callback);
            self.scheduler.timers_mut().finish_fire(&due, callback);
            self.bail_if_fatal()?;
        }
        Ok(())
    }

    fn drain_initial_microtasks(&mut self) {
        // Runs even when the queue is empty: the checkpoint also reports
        // rejections the script left unhandled.
        if self.scheduler.pending_microtasks() > 0 {
            self.set_state(LoopState::DrainingInitialMicrotasks);
        }
        self.invoker.drain_microtasks(&mut self.scheduler);
        self.set_state(LoopState::Running);
    }

    /// Stop the loop and drop every pending timer and microtask. Returns how
    /// many timers were discarded.
    pub fn shutdown(&mut self) -> usize {
        let (timers, microtasks) = self.scheduler.clear();
        debug!(timers, microtasks, "event loop shut down");
        self.set_state(LoopState::Terminated);
        timers
    }

    /// Get a snapshot of the cumulative event loop statistics.
    pub fn stats(&self) -> EventLoopStats {
        let counters = self.invoker.counters();
        let timers = self.scheduler.timers();
        EventLoopStats {
            total_callbacks: counters.callbacks + counters.microtasks,
            total_microtasks: counters.microtasks,
            total_timers_fired: self.timers_fired,
            total_ticks: self.ticks,
            total_waits: self.waits,
            max_microtasks_per_drain: counters.max_microtasks_per_drain,
            timers_scheduled: timers.scheduled_count(),
            timers_cancelled: timers.cancelled_count(),
            unhandled_errors: counters.errors,
        }
    }

    fn snapshot(&self) -> Progress {
        let counters = self.invoker.counters();
        Progress {
            microtasks: counters.microtasks,
            timers_fired: self.timers_fired,
            ticks: self.ticks,
            errors: counters.errors,
        }
    }

    fn ensure_runnable(&self) -> Result<()> {
        match self.state {
            LoopState::Idle | LoopState::Running => Ok(()),
            found => Err(Error::InvalidState {
                expected: "Idle or Running",
                found,
            }),
        }
    }

    fn bail_if_fatal(&mut self) -> Result<()> {
        match self.scheduler.take_fatal() {
            Some(err) => {
                self.set_state(LoopState::Terminated);
                Err(err)
            }
            None => Ok(()),
        }
    }

    fn set_state(&mut self, next: LoopState) {
        if self.state != next {
            debug!(from = %self.state, to = %next, "event loop state");
            self.state = next;
        }
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("state", &self.state)
            .field("scheduler", &self.scheduler)
            .field("invoker", &self.invoker)
            .finish_non_exhaustive()
    }
}

/// Counter values at the start of a run, for computing a [`RunResult`]
#[derive(Debug, Clone, Copy)]
struct Progress {
    microtasks: u64,
    timers_fired: u64,
    ticks: u64,
    errors: u64,
}
