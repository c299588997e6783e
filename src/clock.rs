//! Monotonic time sources
//!
//! The loop never reads wall-clock time directly. It asks a [`Clock`] for the
//! current [`Timestamp`] and, when nothing is due yet, asks the same clock to
//! wait until the next deadline. [`SystemClock`] really sleeps;
//! [`VirtualClock`] jumps straight to the deadline, which makes timer
//! ordering fully reproducible in tests.

use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::warn;

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Timestamp
// ---------------------------------------------------------------------------

/// Milliseconds since the owning clock's origin.
///
/// Opaque outside this crate: timestamps from different clocks are not
/// comparable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The clock origin
    pub const ZERO: Timestamp = Timestamp(0);

    pub fn from_millis(ms: u64) -> Self {
        Timestamp(ms)
    }

    pub fn as_millis(self) -> u64 {
        self.0
    }

    /// `self + ms`, pinned at the far end of time instead of wrapping
    pub fn saturating_add(self, ms: u64) -> Self {
        Timestamp(self.0.saturating_add(ms))
    }

    /// Milliseconds from `earlier` to `self`, zero if `earlier` is later
    pub fn saturating_since(self, earlier: Timestamp) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

// ---------------------------------------------------------------------------
// LoopWaker
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct WakeSignal {
    woken: Mutex<bool>,
    cond: Condvar,
}

/// Wakes an event loop that is blocked waiting for its next timer.
///
/// This is the one piece of the scheduler that may cross threads: a native
/// backend holds a clone and calls [`wake`](LoopWaker::wake) when an
/// external event arrives.
#[derive(Debug, Clone, Default)]
pub struct LoopWaker {
    signal: Arc<WakeSignal>,
}

impl LoopWaker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wake the loop. Wakes are sticky until consumed, so a wake that
    /// arrives before the loop starts waiting is not lost.
    pub fn wake(&self) {
        let mut woken = self
            .signal
            .woken
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *woken = true;
        self.signal.cond.notify_one();
    }

    /// Block for at most `timeout`. Returns `true` if woken early.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let guard = self
            .signal
            .woken
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let (mut woken, _) = self
            .signal
            .cond
            .wait_timeout_while(guard, timeout, |woken| !*woken)
            .unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *woken, false)
    }

    /// Consume a pending wake without blocking
    pub fn take(&self) -> bool {
        let mut woken = self
            .signal
            .woken
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *woken, false)
    }
}

// ---------------------------------------------------------------------------
// Clock trait
// ---------------------------------------------------------------------------

/// A monotonic time source.
pub trait Clock {
    /// Current time. Must never decrease between calls.
    fn now(&self) -> Timestamp;

    /// Return once `deadline` has been reached or `waker` fired, whichever
    /// comes first.
    fn sleep_until(&self, deadline: Timestamp, waker: &LoopWaker);
}

/// Real time, measured from the moment the clock was created.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.origin.elapsed().as_millis() as u64)
    }

    fn sleep_until(&self, deadline: Timestamp, waker: &LoopWaker) {
        let remaining = deadline.saturating_since(self.now());
        if remaining == 0 {
            return;
        }
        waker.wait_timeout(Duration::from_millis(remaining));
    }
}

/// Manually driven time. Clones share the same reading.
///
/// Sleeping moves time forward to the deadline instantly, so a script with a
/// two-second timer finishes in microseconds with the same callback order it
/// would have on a [`SystemClock`].
#[derive(Debug, Clone, Default)]
pub struct VirtualClock {
    now: Rc<Cell<u64>>,
}

impl VirtualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move time forward by `ms`
    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get().saturating_add(ms));
    }

    /// Jump to `to`; earlier targets are ignored
    pub fn advance_to(&self, to: Timestamp) {
        if to.0 > self.now.get() {
            self.now.set(to.0);
        }
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.now.get())
    }

    fn sleep_until(&self, deadline: Timestamp, waker: &LoopWaker) {
        // A wake means "re-check your queues now", so time stays put.
        if waker.take() {
            return;
        }
        self.advance_to(deadline);
    }
}

/// Which clock an [`EventLoop`](crate::EventLoop) built from configuration uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClockKind {
    #[default]
    System,
    Virtual,
}

// ---------------------------------------------------------------------------
// MonotonicGuard
// ---------------------------------------------------------------------------

/// Wraps a [`Clock`] and refuses to hand out a reading earlier than the
/// last one.
pub struct MonotonicGuard {
    inner: Box<dyn Clock>,
    last: Timestamp,
}

impl MonotonicGuard {
    pub fn new(clock: impl Clock + 'static) -> Self {
        Self {
            inner: Box::new(clock),
            last: Timestamp::ZERO,
        }
    }

    /// Read the clock, failing with [`Error::ClockRegression`] if it went
    /// backwards.
    pub fn now(&mut self) -> Result<Timestamp> {
        let current = self.inner.now();
        if current < self.last {
            warn!(previous = %self.last, current = %current, "clock regression");
            return Err(Error::ClockRegression {
                previous: self.last,
                current,
            });
        }
        self.last = current;
        Ok(current)
    }

    /// The last good reading
    pub fn last(&self) -> Timestamp {
        self.last
    }

    pub fn sleep_until(&self, deadline: Timestamp, waker: &LoopWaker) {
        self.inner.sleep_until(deadline, waker);
    }
}

impl fmt::Debug for MonotonicGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonotonicGuard")
            .field("last", &self.last)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::thread;

    struct ScriptedClock {
        readings: RefCell<VecDeque<u64>>,
    }

    impl Clock for ScriptedClock {
        fn now(&self) -> Timestamp {
            Timestamp(self.readings.borrow_mut().pop_front().unwrap_or(0))
        }

        fn sleep_until(&self, _deadline: Timestamp, _waker: &LoopWaker) {}
    }

    #[test]
    fn test_virtual_clock_shared_between_clones() {
        let clock = VirtualClock::new();
        let other = clock.clone();
        clock.advance(250);
        assert_eq!(other.now(), Timestamp::from_millis(250));
    }

    #[test]
    fn test_virtual_clock_sleep_jumps_to_deadline() {
        let clock = VirtualClock::new();
        let waker = LoopWaker::new();
        clock.sleep_until(Timestamp::from_millis(1000), &waker);
        assert_eq!(clock.now(), Timestamp::from_millis(1000));

        // Sleeping to a past deadline never moves time backwards
        clock.sleep_until(Timestamp::from_millis(10), &waker);
        assert_eq!(clock.now(), Timestamp::from_millis(1000));
    }

    #[test]
    fn test_virtual_clock_sleep_interrupted_by_wake() {
        let clock = VirtualClock::new();
        let waker = LoopWaker::new();
        waker.wake();
        clock.sleep_until(Timestamp::from_millis(500), &waker);
        assert_eq!(clock.now(), Timestamp::ZERO);
        assert!(!waker.take());
    }

    #[test]
    fn test_monotonic_guard_detects_regression() {
        let mut guard = MonotonicGuard::new(ScriptedClock {
            readings: RefCell::new(VecDeque::from(vec![10, 20, 15])),
        });
        assert_eq!(guard.now().unwrap(), Timestamp::from_millis(10));
        assert_eq!(guard.now().unwrap(), Timestamp::from_millis(20));

        let err = guard.now().unwrap_err();
        assert!(matches!(
            err,
            Error::ClockRegression { previous, current }
                if previous == Timestamp::from_millis(20) && current == Timestamp::from_millis(15)
        ));
        assert_eq!(guard.last(), Timestamp::from_millis(20));
    }

    #[test]
    fn test_monotonic_guard_accepts_equal_readings() {
        let mut guard = MonotonicGuard::new(ScriptedClock {
            readings: RefCell::new(VecDeque::from(vec![5, 5, 5])),
        });
        for _ in 0..3 {
            assert_eq!(guard.now().unwrap(), Timestamp::from_millis(5));
        }
    }

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }

    #[test]
    fn test_waker_cuts_system_sleep_short() {
        let clock = SystemClock::new();
        let waker = LoopWaker::new();
        let remote = waker.clone();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.wake();
        });

        let start = Instant::now();
        clock.sleep_until(Timestamp::from_millis(10_000), &waker);
        assert!(start.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
    }

    #[test]
    fn test_timestamp_arithmetic() {
        let t = Timestamp::from_millis(100);
        assert_eq!(t.saturating_add(50).as_millis(), 150);
        assert_eq!(Timestamp::from_millis(u64::MAX).saturating_add(1).as_millis(), u64::MAX);
        assert_eq!(t.saturating_since(Timestamp::from_millis(30)), 70);
        assert_eq!(Timestamp::from_millis(30).saturating_since(t), 0);
    }
}
