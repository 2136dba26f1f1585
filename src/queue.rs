// Copyright 2026 microsched contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The shared queue and affinity queue (§3): lock-free MPMC/MPSC structures
//! that sit outside any single worker's deque.
//!
//! Grounded on `alliecatowo-lumen/rust/lumen-runtime/src/scheduler.rs`, which
//! pairs a `crossbeam_deque::Worker` per thread with a global `Injector` for
//! cross-thread submission; we use `crossbeam_queue::SegQueue` instead of
//! `Injector` because the shared queue here is only ever popped one task at a
//! time (no `steal_batch`), and because the affinity queue needs the same
//! lock-free MPSC shape without an injector's batch-steal API.

use crossbeam_queue::SegQueue;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::task::TaskRef;

/// Multi-producer, multi-consumer queue owned by a [`crate::MicroScheduler`]
/// (§3 "Shared queue"). Sharded by producer id to reduce contention (§5:
/// "distributed across sub-queues indexed by producer id").
pub(crate) struct SharedQueue {
    shards: Vec<SegQueue<TaskRef>>,
    len: AtomicUsize,
}

impl SharedQueue {
    pub(crate) fn new(shard_count: usize) -> Self {
        let shard_count = shard_count.max(1);
        Self {
            shards: (0..shard_count).map(|_| SegQueue::new()).collect(),
            len: AtomicUsize::new(0),
        }
    }

    /// Pushes `task`, routing by `producer` to spread contention across
    /// shards. Non-worker callers pass a stable per-thread id (see
    /// [`crate::scheduler::MicroScheduler::queue`]); workers pass their index.
    pub(crate) fn push(&self, producer: usize, task: TaskRef) {
        let shard = producer % self.shards.len();
        self.shards[shard].push(task);
        self.len.fetch_add(1, Ordering::Relaxed);
    }

    /// Pops a task, scanning shards starting at `hint` so repeated pops from
    /// one consumer don't all contend on shard 0.
    pub(crate) fn pop(&self, hint: usize) -> Option<TaskRef> {
        let n = self.shards.len();
        for i in 0..n {
            let idx = (hint + i) % n;
            if let Some(task) = self.shards[idx].pop() {
                self.len.fetch_sub(1, Ordering::Relaxed);
                return Some(task);
            }
        }
        None
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len.load(Ordering::Relaxed) == 0
    }
}

/// Multi-producer, single-consumer FIFO of tasks pinned to one worker (§3
/// "Affinity queue"). Built on the same lock-free queue as [`SharedQueue`]'s
/// shards; the single-consumer contract is enforced by convention (only the
/// owning worker ever calls [`Self::pop`]), not by the type system —
/// single-consumer usage is documented rather than encoded in the type, the
/// same convention comparable MPSC wrappers elsewhere use.
pub(crate) struct AffinityQueue {
    queue: SegQueue<TaskRef>,
}

impl AffinityQueue {
    pub(crate) fn new() -> Self {
        Self {
            queue: SegQueue::new(),
        }
    }

    pub(crate) fn push(&self, task: TaskRef) {
        self.queue.push(task);
    }

    pub(crate) fn pop(&self) -> Option<TaskRef> {
        self.queue.pop()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
