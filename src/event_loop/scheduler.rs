//! The scheduling surface handed to script callbacks
//!
//! Every callback receives `&mut Scheduler`; it is the Rust face of the
//! `setTimeout`/`setInterval`/`clearTimeout`/`clearInterval`/
//! `queueMicrotask` globals. The scheduler owns the timer registry, the
//! microtask queue and the clock; the [`EventLoop`](super::EventLoop) owns
//! the scheduler.

use std::cell::Cell;
use std::rc::Rc;
use tracing::{error, trace};

use super::microtask::MicrotaskQueue;
use super::timers::{TimerCallback, TimerHandle, TimerRegistry};
use crate::clock::{Clock, LoopWaker, MonotonicGuard, Timestamp};
use crate::error::{CallbackError, CallbackResult, Error};

/// A promise rejection waiting to learn whether anyone will handle it
#[derive(Debug)]
pub(crate) struct TrackedRejection {
    pub(crate) handled: Rc<Cell<bool>>,
    pub(crate) reason: CallbackError,
}

/// Shortest period a repeating timer runs at
const MIN_INTERVAL_MS: u64 = 1;

/// Clamp a script-supplied delay: negatives mean "as soon as possible"
fn clamp_delay(ms: i64) -> u64 {
    ms.max(0) as u64
}

#[derive(Debug)]
pub struct Scheduler {
    clock: MonotonicGuard,
    timers: TimerRegistry,
    microtasks: MicrotaskQueue,
    rejections: Vec<TrackedRejection>,
    /// First fatal error raised inside a scheduling call. Callbacks cannot
    /// return it, so it waits here for the loop to pick it up.
    fatal: Option<Error>,
}

impl Scheduler {
    pub fn new(clock: impl Clock + 'static) -> Self {
        Self {
            clock: MonotonicGuard::new(clock),
            timers: TimerRegistry::new(),
            microtasks: MicrotaskQueue::new(),
            rejections: Vec::new(),
            fatal: None,
        }
    }

    /// Current time. A clock regression is latched as fatal and the last
    /// good reading is returned in its place.
    pub fn now(&mut self) -> Timestamp {
        match self.clock.now() {
            Ok(now) => now,
            Err(err) => {
                self.latch_fatal(err);
                self.clock.last()
            }
        }
    }

    /// `setTimeout(callback, delay_ms)`
    pub fn set_timeout<F>(&mut self, delay_ms: i64, callback: F) -> TimerHandle
    where
        F: FnOnce(&mut Scheduler) -> CallbackResult + 'static,
    {
        let mut callback = Some(callback);
        self.schedule(
            clamp_delay(delay_ms),
            None,
            Box::new(move |sched: &mut Scheduler| match callback.take() {
                Some(f) => f(sched),
                None => Ok(()),
            }),
        )
    }

    /// `setInterval(callback, period_ms)`. Periods below 1ms run at 1ms so a
    /// repeating timer always lets time move on.
    pub fn set_interval<F>(&mut self, period_ms: i64, callback: F) -> TimerHandle
    where
        F: FnMut(&mut Scheduler) -> CallbackResult + 'static,
    {
        let period = clamp_delay(period_ms).max(MIN_INTERVAL_MS);
        self.schedule(period, Some(period), Box::new(callback))
    }

    /// `clearTimeout(handle)`; unknown or spent handles are ignored
    pub fn clear_timeout(&mut self, handle: TimerHandle) {
        if self.timers.cancel(handle) {
            trace!(%handle, "timer cancelled");
        }
    }

    /// `clearInterval(handle)`; same as [`clear_timeout`](Self::clear_timeout)
    pub fn clear_interval(&mut self, handle: TimerHandle) {
        self.clear_timeout(handle);
    }

    /// `queueMicrotask(callback)`
    pub fn queue_microtask<F>(&mut self, callback: F)
    where
        F: FnOnce(&mut Scheduler) -> CallbackResult + 'static,
    {
        self.microtasks.enqueue(Box::new(callback));
    }

    /// Whether `handle` still names a pending timer
    pub fn is_pending(&self, handle: TimerHandle) -> bool {
        self.timers.contains(handle)
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    pub fn pending_microtasks(&self) -> usize {
        self.microtasks.len()
    }

    fn schedule(
        &mut self,
        delay_ms: u64,
        interval: Option<u64>,
        callback: TimerCallback,
    ) -> TimerHandle {
        let now = self.now();
        match self.timers.schedule(now, delay_ms, interval, callback) {
            Ok(handle) => {
                trace!(%handle, delay_ms, repeating = interval.is_some(), "timer scheduled");
                handle
            }
            Err(err) => {
                // Nothing was inserted; the handle is returned so the script
                // keeps running until the loop reports the failure.
                let handle = match &err {
                    Error::DuplicateHandle(handle) => *handle,
                    _ => TimerHandle::from_raw(0),
                };
                self.latch_fatal(err);
                handle
            }
        }
    }

    pub(crate) fn timers_mut(&mut self) -> &mut TimerRegistry {
        &mut self.timers
    }

    pub(crate) fn timers(&self) -> &TimerRegistry {
        &self.timers
    }

    pub(crate) fn microtasks_mut(&mut self) -> &mut MicrotaskQueue {
        &mut self.microtasks
    }

    pub(crate) fn sleep_until(&self, deadline: Timestamp, waker: &LoopWaker) {
        self.clock.sleep_until(deadline, waker);
    }

    pub(crate) fn track_rejection(&mut self, handled: Rc<Cell<bool>>, reason: CallbackError) {
        self.rejections.push(TrackedRejection { handled, reason });
    }

    /// Reasons of tracked rejections that are still unhandled; clears the
    /// tracking list.
    pub(crate) fn take_unhandled_rejections(&mut self) -> Vec<CallbackError> {
        std::mem::take(&mut self.rejections)
            .into_iter()
            .filter(|r| !r.handled.get())
            .map(|r| r.reason)
            .collect()
    }

    pub(crate) fn latch_fatal(&mut self, err: Error) {
        if self.fatal.is_none() {
            error!(error = %err, "fatal scheduler error");
            self.fatal = Some(err);
        }
    }

    pub(crate) fn take_fatal(&mut self) -> Option<Error> {
        self.fatal.take()
    }

    /// Drop all pending work, returning `(timers, microtasks)` discarded
    pub(crate) fn clear(&mut self) -> (usize, usize) {
        self.rejections.clear();
        (self.timers.clear(), self.microtasks.clear())
    }
}
