//! Microtask queue
//!
//! Strict FIFO. Draining is the caller's job (see the invoker) because a
//! microtask needs `&mut Scheduler`, which owns this queue.

use std::collections::VecDeque;
use std::fmt;

use super::scheduler::Scheduler;
use crate::error::CallbackResult;

/// A queued continuation (promise reaction, `queueMicrotask` callback)
pub type Microtask = Box<dyn FnOnce(&mut Scheduler) -> CallbackResult>;

#[derive(Default)]
pub struct MicrotaskQueue {
    queue: VecDeque<Microtask>,
}

impl MicrotaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, task: Microtask) {
        self.queue.push_back(task);
    }

    pub fn pop(&mut self) -> Option<Microtask> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Discard everything still queued, returning how many were dropped
    pub fn clear(&mut self) -> usize {
        let dropped = self.queue.len();
        self.queue.clear();
        dropped
    }
}

impl fmt::Debug for MicrotaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MicrotaskQueue")
            .field("len", &self.queue.len())
            .finish()
    }
}
