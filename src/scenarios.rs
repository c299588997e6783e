//! Built-in scenarios
//!
//! Script bodies are external to the scheduler, so the scripts the host was
//! tested with ship here as hand-written Rust renditions next to their
//! JavaScript source. Each closure below corresponds line for line to the
//! script in `scripts/`.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::error::{CallbackError, CallbackResult, Result};
use crate::event_loop::{EventLoop, RunResult, Scheduler, TimerHandle};
use crate::promise::Promise;

// ---------------------------------------------------------------------------
// Console
// ---------------------------------------------------------------------------

/// The `print` binding: records every line and optionally echoes it to
/// stdout as it is printed.
#[derive(Clone, Default)]
pub struct Console {
    lines: Rc<RefCell<Vec<String>>>,
    echo: bool,
}

impl Console {
    /// A console that only records
    pub fn capturing() -> Self {
        Self::default()
    }

    /// A console that records and writes to stdout
    pub fn echoing() -> Self {
        Self {
            lines: Rc::default(),
            echo: true,
        }
    }

    pub fn print(&self, line: impl Into<String>) {
        let line = line.into();
        if self.echo {
            println!("{}", line);
        }
        self.lines.borrow_mut().push(line);
    }

    /// Everything printed so far
    pub fn lines(&self) -> Vec<String> {
        self.lines.borrow().clone()
    }
}

impl fmt::Debug for Console {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Console")
            .field("lines", &self.lines.borrow().len())
            .field("echo", &self.echo)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Scenario
// ---------------------------------------------------------------------------

type ScriptFn = fn(&mut Scheduler, &Console) -> CallbackResult;

/// A named top-level script
pub struct Scenario {
    pub name: &'static str,
    pub summary: &'static str,
    /// The JavaScript this scenario renders
    pub source: &'static str,
    script: ScriptFn,
}

impl Scenario {
    /// Run the script on `event_loop`, then the loop to completion
    pub fn run(&self, event_loop: &mut EventLoop, console: &Console) -> Result<RunResult> {
        let script = self.script;
        let console = console.clone();
        event_loop.run_main(move |s| script(s, &console))
    }
}

impl fmt::Debug for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scenario")
            .field("name", &self.name)
            .field("summary", &self.summary)
            .finish_non_exhaustive()
    }
}

/// Every built-in scenario
pub static SCENARIOS: &[Scenario] = &[
    Scenario {
        name: "clear-timeout",
        summary: "overlapping timers, a cancelled timer and a self-cancelling interval",
        source: include_str!("../scripts/clear_timeout.js"),
        script: clear_timeout,
    },
    Scenario {
        name: "promise-order",
        summary: "promise continuations queued at top level and inside a timer",
        source: include_str!("../scripts/promise_order.js"),
        script: promise_order,
    },
    Scenario {
        name: "uncaught-error",
        summary: "a throwing timer and an unhandled rejection do not stop the loop",
        source: include_str!("../scripts/uncaught_error.js"),
        script: uncaught_error,
    },
];

/// Look up a scenario by name
pub fn find(name: &str) -> Option<&'static Scenario> {
    SCENARIOS.iter().find(|s| s.name == name)
}

fn print_later(console: &Console, line: &'static str) -> impl FnOnce(&mut Scheduler) -> CallbackResult {
    let console = console.clone();
    move |_| {
        console.print(line);
        Ok(())
    }
}

fn print_on_resolve(s: &mut Scheduler, console: &Console, line: &'static str) {
    let console = console.clone();
    Promise::resolved(()).then(s, move |_, ()| {
        console.print(line);
        Ok(())
    });
}

fn clear_timeout(s: &mut Scheduler, console: &Console) -> CallbackResult {
    let a = s.set_timeout(2000, print_later(console, "Hello from setTimeout after 2 second"));

    let out = console.clone();
    s.set_timeout(1000, move |s| {
        out.print("Hello from setTimeout after 1 second");
        print_on_resolve(s, &out, "Running Promise.resolve after 1 second");
        s.clear_timeout(a);
        Ok(())
    });

    print_on_resolve(s, console, "after running Promise.resolve");

    let out = console.clone();
    let count = Cell::new(0u32);
    let interval_id: Rc<Cell<Option<TimerHandle>>> = Rc::default();
    let own_id = interval_id.clone();
    let handle = s.set_interval(500, move |s| {
        count.set(count.get() + 1);
        out.print(format!("Interval count: {}", count.get()));
        if count.get() >= 3 {
            if let Some(id) = own_id.get() {
                s.clear_interval(id);
            }
            out.print("Stopped interval");
        }
        Ok(())
    });
    interval_id.set(Some(handle));

    s.set_timeout(1000, print_later(console, "Timeout after 1 second"));

    console.print("Main script executed");
    Ok(())
}

fn promise_order(s: &mut Scheduler, console: &Console) -> CallbackResult {
    let out = console.clone();
    s.set_timeout(1000, move |s| {
        out.print("Hello from setTimeout after 1 second");
        print_on_resolve(s, &out, "Running Promise.resolve after 1 second");
        Ok(())
    });

    print_on_resolve(s, console, "after running Promise.resolve");

    s.set_timeout(2000, print_later(console, "Hello from setTimeout after 2 second"));

    console.print("After setTimeout");
    Ok(())
}

fn uncaught_error(s: &mut Scheduler, console: &Console) -> CallbackResult {
    let out = console.clone();
    s.set_timeout(100, move |_| {
        out.print("first timer runs");
        Err(CallbackError::type_error("undefined is not a function"))
    });

    s.set_timeout(200, print_later(console, "second timer still runs"));

    Promise::<()>::rejected(s, CallbackError::new("rejected with no handler"));

    console.print("Main script executed");
    Ok(())
}
