//! Promise Implementation
//!
//! A minimal promise that integrates with the scheduler for proper async
//! semantics: continuations never run inside `resolve`/`reject`. Settling a
//! promise enqueues each waiting continuation as a microtask, and attaching a
//! continuation to an already-settled promise enqueues it straight away.
//!
//! ```
//! use quicktick::{EventLoop, Promise, VirtualClock};
//!
//! let mut event_loop = EventLoop::with_clock(VirtualClock::new());
//! event_loop
//!     .run_main(|s| {
//!         Promise::resolved(21).then(s, |_, n| Ok(n * 2));
//!         Ok(())
//!     })
//!     .unwrap();
//! ```

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::error::{CallbackError, CallbackResult};
use crate::event_loop::Scheduler;

/// Promise state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromiseState<T> {
    /// Promise is pending - not yet settled
    Pending,
    /// Promise is fulfilled with a value
    Fulfilled(T),
    /// Promise is rejected with a reason
    Rejected(CallbackError),
}

type Settlement<T> = Result<T, CallbackError>;
type Reaction<T> = Box<dyn FnOnce(&mut Scheduler, Settlement<T>) -> CallbackResult>;

struct PromiseInner<T> {
    state: PromiseState<T>,
    reactions: Vec<Reaction<T>>,
    /// Whether a continuation was ever attached (for unhandled rejection
    /// tracking)
    handled: Rc<Cell<bool>>,
}

/// A single-assignment value whose continuations run as microtasks.
///
/// Cloning yields another reference to the same promise.
pub struct Promise<T> {
    inner: Rc<RefCell<PromiseInner<T>>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Clone + 'static> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + 'static> Promise<T> {
    /// Create a new pending promise
    pub fn new() -> Self {
        Self::with_state(PromiseState::Pending)
    }

    /// `Promise.resolve(value)`
    pub fn resolved(value: T) -> Self {
        Self::with_state(PromiseState::Fulfilled(value))
    }

    /// `Promise.reject(reason)`. Tracked as unhandled until a continuation
    /// is attached.
    pub fn rejected(sched: &mut Scheduler, reason: CallbackError) -> Self {
        let promise = Self::with_state(PromiseState::Rejected(reason.clone()));
        let handled = promise.inner.borrow().handled.clone();
        sched.track_rejection(handled, reason);
        promise
    }

    fn with_state(state: PromiseState<T>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(PromiseInner {
                state,
                reactions: Vec::new(),
                handled: Rc::new(Cell::new(false)),
            })),
        }
    }

    /// Current state
    pub fn state(&self) -> PromiseState<T> {
        self.inner.borrow().state.clone()
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.inner.borrow().state, PromiseState::Pending)
    }

    /// Fulfill the promise. Ignored if it has already settled.
    pub fn resolve(&self, sched: &mut Scheduler, value: T) {
        self.settle(sched, Ok(value));
    }

    /// Reject the promise. Ignored if it has already settled.
    pub fn reject(&self, sched: &mut Scheduler, reason: CallbackError) {
        self.settle(sched, Err(reason));
    }

    fn settle(&self, sched: &mut Scheduler, settlement: Settlement<T>) {
        let reactions = {
            let mut p = self.inner.borrow_mut();
            if !matches!(p.state, PromiseState::Pending) {
                return; // Already settled
            }
            p.state = match &settlement {
                Ok(value) => PromiseState::Fulfilled(value.clone()),
                Err(reason) => PromiseState::Rejected(reason.clone()),
            };
            if let Err(reason) = &settlement {
                if !p.handled.get() {
                    sched.track_rejection(p.handled.clone(), reason.clone());
                }
            }
            std::mem::take(&mut p.reactions)
        };

        for reaction in reactions {
            let settlement = settlement.clone();
            sched.queue_microtask(move |s| reaction(s, settlement));
        }
    }

    fn subscribe(&self, sched: &mut Scheduler, reaction: Reaction<T>) {
        let mut p = self.inner.borrow_mut();
        p.handled.set(true);
        let settlement = match &p.state {
            PromiseState::Pending => None,
            PromiseState::Fulfilled(value) => Some(Ok(value.clone())),
            PromiseState::Rejected(reason) => Some(Err(reason.clone())),
        };
        match settlement {
            None => p.reactions.push(reaction),
            Some(settlement) => {
                drop(p);
                sched.queue_microtask(move |s| reaction(s, settlement));
            }
        }
    }

    /// `promise.then(on_fulfilled)`. A rejection skips `on_fulfilled` and
    /// passes through to the returned promise; an `Err` from `on_fulfilled`
    /// rejects it.
    pub fn then<U, F>(&self, sched: &mut Scheduler, on_fulfilled: F) -> Promise<U>
    where
        U: Clone + 'static,
        F: FnOnce(&mut Scheduler, T) -> Result<U, CallbackError> + 'static,
    {
        let derived = Promise::<U>::new();
        let next = derived.clone();
        self.subscribe(
            sched,
            Box::new(move |s: &mut Scheduler, settlement: Settlement<T>| {
                match settlement.and_then(|value| on_fulfilled(s, value)) {
                    Ok(value) => next.resolve(s, value),
                    Err(reason) => next.reject(s, reason),
                }
                Ok(())
            }),
        );
        derived
    }

    /// `promise.catch(on_rejected)`. Fulfillment passes through untouched.
    pub fn catch<F>(&self, sched: &mut Scheduler, on_rejected: F) -> Promise<T>
    where
        F: FnOnce(&mut Scheduler, CallbackError) -> Result<T, CallbackError> + 'static,
    {
        let derived = Promise::<T>::new();
        let next = derived.clone();
        self.subscribe(
            sched,
            Box::new(move |s: &mut Scheduler, settlement: Settlement<T>| {
                match settlement.or_else(|reason| on_rejected(s, reason)) {
                    Ok(value) => next.resolve(s, value),
                    Err(reason) => next.reject(s, reason),
                }
                Ok(())
            }),
        );
        derived
    }
}

impl<T: fmt::Debug> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let p = self.inner.borrow();
        f.debug_struct("Promise")
            .field("state", &p.state)
            .field("reactions", &p.reactions.len())
            .finish()
    }
}
