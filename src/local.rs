// Copyright 2026 microsched contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Per-worker, per-scheduler state (§4.3): the priority band of deques, the
//! affinity queue, the isolation tag, and the priority-boost-age counter.
//!
//! One [`LocalScheduler`] exists for every `(worker, MicroScheduler)` pair a
//! worker pool hosts; [`crate::scheduler::MicroScheduler`] owns the
//! `Vec<LocalScheduler>`, one per worker index, sized once at registration.
//!
//! The per-worker RNG and idle backoff are deliberately *not* stored here —
//! see DESIGN.md — they are physical properties of the OS thread, created as
//! plain locals in [`crate::executor`]'s run loop, not duplicated per
//! attached scheduler.

use arrayvec::ArrayVec;
use crossbeam_deque::{Steal, Stealer, Worker as Deque};
use std::cell::Cell;

use crate::task::{Priority, TaskRef, MAX_PRIORITIES};

/// Grounded on `alliecatowo-lumen/rust/lumen-runtime/src/scheduler.rs`'s
/// `Worker`/`Stealer` pair, layered once per priority band (§3 "Priority
/// band"). `new_lifo` gives owner-pop LIFO / thief-steal FIFO semantics,
/// matching §4.2's "standard Chase-Lev deque".
struct Band {
    deque: Deque<TaskRef>,
    stealer: Stealer<TaskRef>,
}

impl Band {
    fn new() -> Self {
        let deque = Deque::new_lifo();
        let stealer = deque.stealer();
        Self { deque, stealer }
    }
}

/// Whether a task matches the calling worker's current isolation context
/// (§4.2 "Isolation filter", §4.5 "Isolation semantics").
///
/// An isolated worker (`current != 0`) only accepts tasks stamped with its
/// own tag. A non-isolated worker (`current == 0`) accepts everything,
/// including tasks stamped during someone else's isolation scope — this is
/// what lets *other* workers help execute an isolated data-parallel loop
/// while only the calling worker itself is forbidden from interleaving outer
/// work during its own `isolate` call. See DESIGN.md.
pub(crate) fn isolation_matches(current: usize, task_tag: usize) -> bool {
    current == 0 || current == task_tag
}

use crate::queue::AffinityQueue;

pub(crate) struct LocalScheduler {
    bands: ArrayVec<Band, MAX_PRIORITIES>,
    affinity: AffinityQueue,
    isolation_tag: Cell<usize>,
    boost_age: Cell<i32>,
    configured_boost_age: i32,
    next_boost_band: Cell<usize>,
    active_bands: usize,
}

// Safety: `Band::deque` (a `crossbeam_deque::Worker`) is pushed to or popped
// from only by the single worker thread that owns this `LocalScheduler`
// (enforced by convention: only `crate::executor`'s run loop for this worker
// index calls `push`/`pop_local`/`pop_boosted`/`push_affinity`/`pop_affinity`
// and the isolation-tag setters). Every other thread only ever calls
// `steal_from`, which exclusively touches `Band::stealer`, a genuinely `Sync`
// type, so concurrent access from other workers never races the owner.
unsafe impl Sync for LocalScheduler {}

impl LocalScheduler {
    pub(crate) fn new(active_bands: usize, boost_age: i32) -> Self {
        let active_bands = active_bands.clamp(1, MAX_PRIORITIES);
        Self {
            bands: (0..MAX_PRIORITIES).map(|_| Band::new()).collect::<ArrayVec<_, MAX_PRIORITIES>>(),
            affinity: AffinityQueue::new(),
            isolation_tag: Cell::new(0),
            boost_age: Cell::new(boost_age),
            configured_boost_age: boost_age,
            next_boost_band: Cell::new(1),
            active_bands,
        }
    }

    pub(crate) fn isolation_tag(&self) -> usize {
        self.isolation_tag.get()
    }

    pub(crate) fn set_isolation_tag(&self, tag: usize) -> usize {
        self.isolation_tag.replace(tag)
    }

    pub(crate) fn stealer(&self, priority: usize) -> &Stealer<TaskRef> {
        &self.bands[priority].stealer
    }

    /// Pushes a freshly spawned task onto this worker's deque at its own
    /// priority band, stamping it with the current isolation tag (§3: "tasks
    /// spawned during isolation are stamped with the tag").
    pub(crate) fn push(&self, task: TaskRef) {
        task.set_isolation_tag(self.isolation_tag.get());
        self.bands[task.priority().index()].deque.push(task);
    }

    /// Pushes a task directly into an already-chosen band, bypassing the
    /// isolation stamp — used to relocate a task a thief stole but couldn't
    /// accept (see [`Self::steal_from`]), which must keep its original tag.
    fn push_raw(&self, task: TaskRef) {
        self.bands[task.priority().index()].deque.push(task);
    }

    /// `get_local` (§4.3): pop the highest-priority non-empty band, honoring
    /// isolation. Falls through bands 0, 1, 2, ... in order, so a lower
    /// band is served whenever every higher band is genuinely empty — this
    /// is what makes S4 (plain priority ordering, no flood) work without the
    /// boost mechanism ever firing. [`Self::pop_boosted`] is the separate,
    /// *forced* override that lets a lower band jump ahead of a
    /// non-empty band 0 once its age counter expires (S5: starvation under
    /// a continuous flood, which this natural fallback alone cannot break,
    /// since band 0 here never actually empties).
    pub(crate) fn pop_local(&self) -> Option<TaskRef> {
        for band in 0..self.active_bands {
            if let Some(task) = self.pop_band(band) {
                return Some(task);
            }
        }
        None
    }

    /// `get_boosted_local` (§4.3): when the boost-age counter has expired,
    /// round-robin through the non-zero priority bands so a flood of
    /// priority-0 tasks cannot starve them indefinitely.
    pub(crate) fn pop_boosted(&self) -> Option<TaskRef> {
        if self.boost_age.get() > 0 || self.active_bands <= 1 {
            return None;
        }
        for offset in 0..self.active_bands.saturating_sub(1) {
            let band = 1 + (self.next_boost_band.get() + offset) % (self.active_bands - 1);
            if let Some(task) = self.pop_band(band) {
                self.next_boost_band.set(band % (self.active_bands - 1) + 1);
                self.boost_age.set(self.configured_boost_age);
                return Some(task);
            }
        }
        // No lower-priority work was actually available; reset the counter
        // anyway so we don't retry every single pass.
        self.boost_age.set(self.configured_boost_age);
        None
    }

    fn pop_band(&self, band: usize) -> Option<TaskRef> {
        let task = self.bands[band].deque.pop()?;
        if isolation_matches(self.isolation_tag.get(), task.isolation_tag()) {
            Some(task)
        } else {
            // "pop re-advances tail": put the mismatched task back at the
            // same LIFO slot. Safe because pop/push here are both
            // owner-thread-only operations.
            self.bands[band].deque.push(task);
            None
        }
    }

    pub(crate) fn pop_affinity(&self) -> Option<TaskRef> {
        self.affinity.pop()
    }

    pub(crate) fn push_affinity(&self, task: TaskRef) {
        self.affinity.push(task);
    }

    /// `steal()` against one victim's bands, trying the normal band first
    /// then (rarely) the others. Returns `None` on a clean miss; the caller
    /// tolerates spurious empties per §4.2.
    pub(crate) fn steal_from(&self, victim: &LocalScheduler, my_tag: usize) -> Option<TaskRef> {
        for band in 0..victim.active_bands {
            loop {
                match victim.bands[band].stealer.steal() {
                    Steal::Success(task) => {
                        if isolation_matches(my_tag, task.isolation_tag()) {
                            tracing::trace!(?task, band, "steal succeeded");
                            return Some(task);
                        }
                        // We already removed it from the victim; we can't put
                        // it back there (only the owner may push). Relocate
                        // it onto our own matching band and try the next
                        // band/victim. See DESIGN.md.
                        tracing::trace!(?task, band, "stolen task isolation mismatch, relocating");
                        self.push_raw(task);
                        break;
                    }
                    Steal::Retry => continue,
                    Steal::Empty => break,
                }
            }
        }
        None
    }

    pub(crate) fn decrement_boost_age(&self) {
        self.boost_age.set(self.boost_age.get() - 1);
    }

    pub(crate) fn approx_empty(&self) -> bool {
        self.affinity.is_empty() && self.bands.iter().all(|b| b.deque.is_empty())
    }
}
