//! Callback invoker
//!
//! Every activation of script code goes through here: top-level scripts,
//! timer callbacks and microtasks. An `Err` from a callback stops at this
//! boundary and becomes an [`UnhandledError`] for the embedder. After each
//! script or timer callback the microtask queue is drained to empty before
//! control returns to the loop.

use std::fmt;
use tracing::{error, trace};

use super::scheduler::Scheduler;
use super::timers::{TimerCallback, TimerHandle};
use crate::clock::Timestamp;
use crate::error::{CallbackError, CallbackResult, Error};

/// Where an unhandled error was raised
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSource {
    /// Top-level script code
    Script,
    /// A timer callback
    Timer(TimerHandle),
    /// A queued microtask
    Microtask,
    /// A promise rejected with no rejection handler attached
    Promise,
}

impl fmt::Display for ErrorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorSource::Script => write!(f, "script"),
            ErrorSource::Timer(handle) => write!(f, "timer {}", handle),
            ErrorSource::Microtask => write!(f, "microtask"),
            ErrorSource::Promise => write!(f, "promise"),
        }
    }
}

/// An error a callback raised and nobody caught
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnhandledError {
    pub source: ErrorSource,
    pub error: CallbackError,
    /// Loop time when the error surfaced
    pub at: Timestamp,
}

impl fmt::Display for UnhandledError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Uncaught {} (in {} at {})", self.error, self.source, self.at)
    }
}

/// Embedder hook receiving every unhandled error
pub type ErrorHook = Box<dyn FnMut(&UnhandledError)>;

/// Running totals kept by the invoker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InvokerCounters {
    /// Script and timer callbacks; microtasks are counted separately
    pub callbacks: u64,
    pub microtasks: u64,
    pub errors: u64,
    pub max_microtasks_per_drain: u64,
}

pub struct Invoker {
    hook: Option<ErrorHook>,
    log_errors: bool,
    budget: Option<usize>,
    counters: InvokerCounters,
}

impl Invoker {
    pub fn new(log_errors: bool, budget: Option<usize>) -> Self {
        Self {
            hook: None,
            log_errors,
            budget,
            counters: InvokerCounters::default(),
        }
    }

    pub fn set_hook(&mut self, hook: ErrorHook) {
        self.hook = Some(hook);
    }

    pub fn counters(&self) -> InvokerCounters {
        self.counters
    }

    /// Run top-level script code. The caller drains the microtasks it
    /// queued.
    pub fn call_script<F>(&mut self, sched: &mut Scheduler, script: F)
    where
        F: FnOnce(&mut Scheduler) -> CallbackResult,
    {
        trace!("invoking script");
        self.counters.callbacks += 1;
        let result = script(sched);
        self.settle(sched, ErrorSource::Script, result);
    }

    /// Run a fired timer's callback, then drain microtasks. The callback is
    /// handed back so a repeating timer can be re-armed with it.
    pub fn invoke_timer(
        &mut self,
        sched: &mut Scheduler,
        handle: TimerHandle,
        mut callback: TimerCallback,
    ) -> TimerCallback {
        trace!(%handle, "invoking timer");
        self.counters.callbacks += 1;
        let result = callback(sched);
        self.settle(sched, ErrorSource::Timer(handle), result);
        self.drain_microtasks(sched);
        callback
    }

    /// Run microtasks until the queue is empty at the moment of the check,
    /// including ones queued during this drain. Returns how many ran.
    ///
    /// Stops early only when the configured budget is exhausted, which is
    /// latched on the scheduler as fatal.
    pub fn drain_microtasks(&mut self, sched: &mut Scheduler) -> usize {
        let mut ran = 0usize;
        loop {
            // Checked before popping so the queue is intact when the loop
            // reports the failure.
            if let Some(limit) = self.budget {
                if ran >= limit && sched.pending_microtasks() > 0 {
                    sched.latch_fatal(Error::MicrotaskBudgetExceeded { limit });
                    break;
                }
            }
            let Some(task) = sched.microtasks_mut().pop() else {
                break;
            };
            ran += 1;
            let result = task(sched);
            self.settle(sched, ErrorSource::Microtask, result);
        }

        // Rejections are judged once the queue is empty, since a handler may
        // be attached by a later microtask in the same checkpoint.
        for reason in sched.take_unhandled_rejections() {
            self.report(sched, ErrorSource::Promise, reason);
        }
        self.record_drain(ran);
        ran
    }

    fn record_drain(&mut self, ran: usize) {
        let ran = ran as u64;
        self.counters.microtasks += ran;
        self.counters.max_microtasks_per_drain = self.counters.max_microtasks_per_drain.max(ran);
    }

    fn settle(&mut self, sched: &mut Scheduler, source: ErrorSource, result: CallbackResult) {
        if let Err(err) = result {
            self.report(sched, source, err);
        }
    }

    fn report(&mut self, sched: &mut Scheduler, source: ErrorSource, error: CallbackError) {
        self.counters.errors += 1;
        let event = UnhandledError {
            source,
            error,
            at: sched.now(),
        };
        if self.log_errors {
            error!(source = %event.source, at = %event.at, "Uncaught {}", event.error);
        }
        if let Some(hook) = self.hook.as_mut() {
            hook(&event);
        }
    }
}

impl fmt::Debug for Invoker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invoker")
            .field("has_hook", &self.hook.is_some())
            .field("log_errors", &self.log_errors)
            .field("budget", &self.budget)
            .field("counters", &self.counters)
            .finish()
    }
}
