// Copyright 2026 microsched contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use bitflags::bitflags;

bitflags! {
    /// The task state bitfield from the data model (§3): `ALLOCATED` is set at
    /// allocation and never cleared; the rest toggle across the task's
    /// lifecycle. Stored as a single `AtomicU32` in [`super::Header`] so a
    /// worker can publish several flags at once with one release store.
    #[derive(Debug, Clone, Copy, Eq, PartialEq)]
    pub struct State: u32 {
        /// Set once at allocation, for the lifetime of the task.
        const ALLOCATED     = 1 << 0;
        /// In a deque, affinity queue, or shared queue, waiting to run.
        const QUEUED         = 1 << 1;
        /// A worker is currently inside this task's `execute`.
        const EXECUTING      = 1 << 2;
        /// This task is a continuation (set on the continuation itself by
        /// `set_continuation`, never on the predecessor).
        const CONTINUATION   = 1 << 3;
        /// Set (informationally) when a task was last obtained via `steal`
        /// rather than popped from its owner's deque. Useful for tracing only.
        const STOLEN         = 1 << 4;
        /// Set by `execute` to request re-execution of the same task without
        /// freeing its memory.
        const RECYCLE        = 1 << 5;
        /// This task is a wait sentinel: never executed, only ever used as a
        /// completion target for an external (non-worker) `wait`.
        const WAITING_DUMMY  = 1 << 6;
    }
}
