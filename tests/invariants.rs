// Copyright 2026 microsched contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Universal invariants (§8, properties 1-4), exercised across many
//! repeated fork/join cycles rather than a single scenario.
//!
//! Properties 3 ("ref count never goes negative") and 4 ("a task's parent
//! link is followed, and the parent's count decremented, strictly before a
//! child with a parent reaches ref-count zero") are enforced internally by
//! `debug_assert!`/`debug_assert_eq!` in [`microsched::task`]'s ref-count and
//! completion-cascade code (see `remove_ref` and `finish_task`); there is no
//! public accessor to check a ref count directly from outside the crate, so
//! these tests' real job is to *run enough concurrent completions, repeated
//! enough times, that any violation would already have tripped one of those
//! asserts* in a debug build. Property 1 (conservation) and property 2
//! (every spawned child runs exactly once) are checked directly below.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use microsched::{Context, MicroScheduler, Priority, SchedulerConfig, TaskRef, WorkerPoolBuilder};

const ITERATIONS: usize = 200;
const FANOUT: u32 = 3;
const DEPTH: u32 = 4;

fn counting_tree_task(
    depth: u32,
    next_id: Arc<AtomicUsize>,
    seen: Arc<Mutex<HashSet<usize>>>,
) -> impl FnMut(&Context<'_>) -> Option<TaskRef> {
    let my_id = next_id.fetch_add(1, Ordering::Relaxed);
    move |cx: &Context<'_>| {
        assert!(
            seen.lock().unwrap().insert(my_id),
            "task {my_id} executed more than once"
        );
        if depth > 0 {
            for _ in 0..FANOUT {
                cx.spawn_child(
                    counting_tree_task(depth - 1, Arc::clone(&next_id), Arc::clone(&seen)),
                    Priority::NORMAL,
                )
                .unwrap();
            }
        }
        None
    }
}

/// Property 2: every task spawned under a waited-upon root executes exactly
/// once. `HashSet::insert` returning `false` (a duplicate) fails the
/// assertion inside the task body itself.
#[test]
fn every_spawned_child_executes_exactly_once() {
    let pool = WorkerPoolBuilder::new().workers(4).build();
    let scheduler = MicroScheduler::new(&pool, SchedulerConfig::default());

    let next_id = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(Mutex::new(HashSet::new()));
    let root = TaskRef::allocate(
        counting_tree_task(DEPTH, Arc::clone(&next_id), Arc::clone(&seen)),
        Priority::NORMAL,
    )
    .unwrap();
    scheduler.spawn_and_wait(root);

    let expected: usize = (0..=DEPTH).map(|level| FANOUT.pow(level) as usize).sum();
    assert_eq!(seen.lock().unwrap().len(), expected);
    assert_eq!(next_id.load(Ordering::Relaxed), expected);
    pool.shutdown();
}

/// Property 1 (conservation): after `waitForAll` drains a tree spawned via
/// `spawn_and_wait`, every allocation from that tree has been matched by a
/// `destroy` — repeated `ITERATIONS` times on one long-lived pool to give any
/// leak (or double-free, which would corrupt the count the other way) a
/// chance to accumulate into a visible mismatch.
#[test]
#[cfg(feature = "counters")]
fn repeated_fork_join_cycles_conserve_allocations() {
    let pool = WorkerPoolBuilder::new().workers(4).build();
    let scheduler = MicroScheduler::new(&pool, SchedulerConfig::default());

    for i in 0..ITERATIONS {
        let baseline = microsched::task::live_task_count();
        let next_id = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(HashSet::new()));
        let root = TaskRef::allocate(
            counting_tree_task(3, Arc::clone(&next_id), Arc::clone(&seen)),
            Priority::NORMAL,
        )
        .unwrap();
        scheduler.spawn_and_wait(root);
        assert_eq!(
            microsched::task::live_task_count(),
            baseline,
            "iteration {i} leaked or double-freed a task"
        );
    }
    pool.shutdown();
}

/// Same repeated-cycle pressure, but with children fanning out across an
/// explicit affinity pin half the time, exercising the affinity queue's
/// ref-count bookkeeping alongside the plain local-deque path.
#[test]
fn repeated_cycles_with_mixed_affinity_do_not_panic() {
    let pool = WorkerPoolBuilder::new().workers(4).build();
    let scheduler = MicroScheduler::new(&pool, SchedulerConfig::default());

    for _ in 0..ITERATIONS {
        let done = Arc::new(AtomicUsize::new(0));
        let done_root = Arc::clone(&done);
        let root = TaskRef::allocate(
            move |cx: &Context<'_>| {
                for i in 0..8u32 {
                    let done = Arc::clone(&done_root);
                    let builder = microsched::TaskBuilder::new().affinity(i % 4);
                    cx.spawn_child_with(builder, move |_cx: &Context<'_>| {
                        done.fetch_add(1, Ordering::Relaxed);
                        None
                    })
                    .unwrap();
                }
                None
            },
            Priority::NORMAL,
        )
        .unwrap();
        scheduler.spawn_and_wait(root);
        assert_eq!(done.load(Ordering::Relaxed), 8);
    }
    pool.shutdown();
}
