//! Timer registry
//!
//! Live timers sit in a map keyed by handle; a min-heap of
//! `(due_at, sequence)` keys gives the firing order. Cancelling removes the
//! map entry only, and any heap key whose sequence no longer matches a live
//! entry is stale and skipped when it reaches the top.

use rustc_hash::FxHashMap as HashMap;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fmt;

use super::scheduler::Scheduler;
use crate::clock::Timestamp;
use crate::error::{CallbackResult, Error, Result};

/// Callback stored in a timer entry. `FnMut` so an interval can run it
/// repeatedly; one-shot callbacks are adapted from `FnOnce`.
pub type TimerCallback = Box<dyn FnMut(&mut Scheduler) -> CallbackResult>;

/// Opaque token returned by `set_timeout`/`set_interval`.
///
/// Handles are assigned from a counter that only grows, so a stale handle
/// can never cancel a timer created after it was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimerHandle(u64);

impl TimerHandle {
    /// Reconstruct a handle from a value a script passed back to us.
    /// The value need not name a timer that ever existed.
    pub fn from_raw(raw: u64) -> Self {
        TimerHandle(raw)
    }

    pub fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct TimerEntry {
    due_at: Timestamp,
    interval: Option<u64>,
    sequence: u64,
    /// `None` while the callback is out being invoked
    callback: Option<TimerCallback>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct QueueKey {
    due_at: Timestamp,
    sequence: u64,
    handle: TimerHandle,
}

/// One member of a due-batch: a value snapshot of the timer as it stood
/// when the batch was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DueTimer {
    pub handle: TimerHandle,
    pub due_at: Timestamp,
    pub sequence: u64,
    pub interval: Option<u64>,
}

/// Priority-ordered collection of pending timers
#[derive(Default)]
pub struct TimerRegistry {
    entries: HashMap<TimerHandle, TimerEntry>,
    queue: BinaryHeap<Reverse<QueueKey>>,
    next_handle: u64,
    next_sequence: u64,
    scheduled: u64,
    cancelled: u64,
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a timer due `delay_ms` after `now`. An `interval` makes it
    /// repeating.
    pub fn schedule(
        &mut self,
        now: Timestamp,
        delay_ms: u64,
        interval: Option<u64>,
        callback: TimerCallback,
    ) -> Result<TimerHandle> {
        self.next_handle += 1;
        let handle = TimerHandle(self.next_handle);
        if self.entries.contains_key(&handle) {
            return Err(Error::DuplicateHandle(handle));
        }

        let due_at = now.saturating_add(delay_ms);
        let sequence = self.bump_sequence();
        self.entries.insert(
            handle,
            TimerEntry {
                due_at,
                interval,
                sequence,
                callback: Some(callback),
            },
        );
        self.queue.push(Reverse(QueueKey {
            due_at,
            sequence,
            handle,
        }));
        self.scheduled += 1;
        Ok(handle)
    }

    /// Cancel a timer. Unknown, fired and already-cancelled handles are
    /// ignored; returns whether a live timer was actually cancelled.
    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        if self.entries.remove(&handle).is_some() {
            self.cancelled += 1;
            true
        } else {
            false
        }
    }

    /// Due time of the earliest live timer
    pub fn next_due_at(&mut self) -> Option<Timestamp> {
        self.prune_stale();
        self.queue.peek().map(|Reverse(key)| key.due_at)
    }

    /// Take every live timer due at or before `at_or_before`, ordered by due
    /// time then registration order.
    ///
    /// The entries stay registered until [`begin_fire`](Self::begin_fire),
    /// so a callback earlier in the batch can still cancel a later one.
    pub fn pop_due(&mut self, at_or_before: Timestamp) -> Vec<DueTimer> {
        let mut batch = Vec::new();
        loop {
            self.prune_stale();
            match self.queue.peek() {
                Some(Reverse(key)) if key.due_at <= at_or_before => {}
                _ => break,
            }
            let Some(Reverse(key)) = self.queue.pop() else {
                break;
            };
            let interval = self.entries.get(&key.handle).and_then(|e| e.interval);
            batch.push(DueTimer {
                handle: key.handle,
                due_at: key.due_at,
                sequence: key.sequence,
                interval,
            });
        }
        batch
    }

    /// Re-validate a due timer and take its callback out for invocation.
    ///
    /// Returns `None` if the timer was cancelled since the batch was taken.
    /// A one-shot timer leaves the registry here. A repeating one is re-armed
    /// here at `due_at + interval` with a fresh sequence, so it orders ahead
    /// of anything its own callback schedules for the same time; it stays
    /// registered with its callback checked out until
    /// [`finish_fire`](Self::finish_fire).
    pub fn begin_fire(&mut self, due: &DueTimer) -> Option<TimerCallback> {
        let live = self
            .entries
            .get(&due.handle)
            .is_some_and(|e| e.sequence == due.sequence);
        if !live {
            return None;
        }
        let Some(period) = due.interval else {
            return self.entries.remove(&due.handle).and_then(|e| e.callback);
        };
        let sequence = self.bump_sequence();
        let entry = self.entries.get_mut(&due.handle)?;
        entry.due_at = due.due_at.saturating_add(period);
        entry.sequence = sequence;
        entry.callback.take()
    }

    /// Hand a fired callback back. A repeating timer that is still live goes
    /// back in the queue at the slot [`begin_fire`](Self::begin_fire)
    /// reserved; anything else drops the callback.
    pub fn finish_fire(&mut self, due: &DueTimer, callback: TimerCallback) {
        if due.interval.is_none() {
            return;
        }
        // Checked last thing before re-insertion: the callback may have
        // cancelled its own interval.
        let Some(entry) = self.entries.get_mut(&due.handle) else {
            return;
        };
        if entry.callback.is_some() {
            return;
        }
        entry.callback = Some(callback);
        self.queue.push(Reverse(QueueKey {
            due_at: entry.due_at,
            sequence: entry.sequence,
            handle: due.handle,
        }));
    }

    /// Whether `handle` names a live timer
    pub fn contains(&self, handle: TimerHandle) -> bool {
        self.entries.contains_key(&handle)
    }

    /// Number of live timers
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every timer, returning how many were live
    pub fn clear(&mut self) -> usize {
        let live = self.entries.len();
        self.entries.clear();
        self.queue.clear();
        live
    }

    /// Total timers ever scheduled
    pub fn scheduled_count(&self) -> u64 {
        self.scheduled
    }

    /// Total live timers cancelled
    pub fn cancelled_count(&self) -> u64 {
        self.cancelled
    }

    fn bump_sequence(&mut self) -> u64 {
        self.next_sequence += 1;
        self.next_sequence
    }

    fn prune_stale(&mut self) {
        while let Some(Reverse(key)) = self.queue.peek() {
            let live = self
                .entries
                .get(&key.handle)
                .is_some_and(|e| e.sequence == key.sequence);
            if live {
                break;
            }
            self.queue.pop();
        }
    }
}

impl fmt::Debug for TimerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerRegistry")
            .field("live", &self.entries.len())
            .field("queued_keys", &self.queue.len())
            .field("next_handle", &self.next_handle)
            .finish()
    }
}
