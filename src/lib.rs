//! Quicktick: the scheduling core of a minimal JavaScript host
//!
//! Quicktick drives `setTimeout`/`setInterval`/`clearTimeout`/
//! `clearInterval` timers and the microtask queue (`Promise` continuations)
//! to completion in the order a script author expects. Parsing and executing
//! JavaScript is left to the embedding engine: script callbacks are plain
//! Rust closures that receive a [`Scheduler`] and return a
//! [`CallbackResult`], where `Err` plays the part of a thrown exception.
//!
//! # Quick Start
//!
//! ```
//! use quicktick::{EventLoop, Promise, VirtualClock};
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! fn main() -> quicktick::Result<()> {
//!     let log = Rc::new(RefCell::new(Vec::new()));
//!     let mut event_loop = EventLoop::with_clock(VirtualClock::new());
//!
//!     let l = log.clone();
//!     event_loop.run_main(move |s| {
//!         let timer_log = l.clone();
//!         s.set_timeout(10, move |_| {
//!             timer_log.borrow_mut().push("timeout");
//!             Ok(())
//!         });
//!         let then_log = l.clone();
//!         Promise::resolved(()).then(s, move |_, ()| {
//!             then_log.borrow_mut().push("then");
//!             Ok(())
//!         });
//!         l.borrow_mut().push("script");
//!         Ok(())
//!     })?;
//!
//!     assert_eq!(*log.borrow(), vec!["script", "then", "timeout"]);
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`clock`] | [`Clock`] trait, system and virtual clocks, [`LoopWaker`] |
//! | [`event_loop`] | [`EventLoop`], [`Scheduler`], timer registry, microtask queue, invoker |
//! | [`promise`] | [`Promise`] whose continuations run as microtasks |
//! | [`config`] | [`LoopConfig`] |
//! | [`scenarios`] | Built-in scripts used by the CLI |

pub mod clock;
pub mod config;
pub mod event_loop;
pub mod promise;
pub mod scenarios;

mod error;

pub use clock::{Clock, ClockKind, LoopWaker, SystemClock, Timestamp, VirtualClock};
pub use config::LoopConfig;
pub use error::{CallbackError, CallbackResult, Error, ErrorKind, Result};
pub use event_loop::{
    ErrorSource, EventLoop, EventLoopStats, LoopState, RunResult, Scheduler, TimerHandle,
    UnhandledError,
};
pub use promise::{Promise, PromiseState};

/// Quicktick version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
