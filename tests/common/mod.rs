//! Shared test helpers for integration tests

use quicktick::{EventLoop, UnhandledError, VirtualClock};
use std::cell::RefCell;
use std::rc::Rc;

/// Ordered record of what callbacks did, shared between closures
#[derive(Clone, Default)]
pub struct Trace(Rc<RefCell<Vec<String>>>);

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.0.borrow_mut().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.borrow().clone()
    }
}

/// Unhandled errors collected by the loop's hook
pub type Errors = Rc<RefCell<Vec<UnhandledError>>>;

/// Event loop on a virtual clock, collecting unhandled errors
pub fn virtual_loop() -> (EventLoop, VirtualClock, Errors) {
    let clock = VirtualClock::new();
    let mut event_loop = EventLoop::with_clock(clock.clone());
    let errors: Errors = Rc::default();
    let sink = errors.clone();
    event_loop.on_unhandled_error(move |e| sink.borrow_mut().push(e.clone()));
    (event_loop, clock, errors)
}

/// Callback that appends `entry` to `trace` when it runs
#[allow(dead_code)]
pub fn log_to(
    trace: &Trace,
    entry: &'static str,
) -> impl FnOnce(&mut quicktick::Scheduler) -> quicktick::CallbackResult {
    let trace = trace.clone();
    move |_| {
        trace.push(entry);
        Ok(())
    }
}
