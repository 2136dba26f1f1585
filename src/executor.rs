// Copyright 2026 microsched contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The executor algorithm (§4.3): task-selection chain, the inner
//! execute/recycle loop, and the recursive completion cascade.
//!
//! This module is the "pure" half of the executor loop — it knows how to run
//! one task to (recycle-adjusted) completion and how to pick the next one
//! from a single [`MicroScheduler`]'s sources. The OS-thread wrapper that
//! drives this repeatedly, across every scheduler registered with a pool,
//! parking and waking as load demands, lives in [`crate::worker`] — keeping
//! the selection/completion algorithm separate from the OS-thread harness
//! that drives it.

use crate::rng::Rng;
use crate::scheduler::MicroScheduler;
use crate::task::{Context, State, TaskRef};

/// Runs `task` to completion, including any recycle retries, and returns the
/// next task to run on this worker with no deque round-trip (a "bypass"):
/// either `task.execute`'s own returned successor, or a continuation that
/// just became ready as a side effect of this task (or one of its
/// descendants) finishing. See [`finish_task`] for the completion cascade.
///
/// Caller contract: `task` must be a task this worker is entitled to run
/// (popped from its own structures, stolen, or handed in as a bypass) and
/// must not be `WAITING_DUMMY`.
pub(crate) fn run_task(
    scheduler: &MicroScheduler,
    worker: usize,
    task: TaskRef,
) -> Option<TaskRef> {
    let next = loop {
        task.insert_state(State::EXECUTING);
        task.remove_state(State::QUEUED);
        let cx = Context::new(scheduler, worker, task);
        let next = task.execute(&cx);
        scheduler.callbacks().fire_task_executed(worker, task);
        if task.state().contains(State::RECYCLE) {
            task.remove_state(State::RECYCLE);
            tracing::trace!(worker, ?task, "recycling task");
            // Re-execute the same task; the successor computed on a
            // recycled pass is not meaningful and is discarded (§4.3: "if
            // RECYCLE: clear flag; continue" re-enters the loop on the same
            // task, it does not chain to `next`).
            continue;
        }
        break next;
    };

    // §4.3: "decrement_priority_boost_age()" — once per completed task
    // (recycle retries don't count, since the task hasn't actually finished),
    // regardless of which band it came from.
    scheduler.local(worker).decrement_boost_age();

    if task.ref_count() > 1 {
        // Implicit wait (§4.3): children are still outstanding. `task`
        // itself is left exactly as-is; whichever worker's `finish_task`
        // call drives its last child to completion will cascade into
        // finishing `task` too.
        tracing::trace!(worker, ?task, "implicit wait, children still outstanding");
        return next;
    }

    let bypass = finish_task(scheduler, task);
    match next {
        Some(n) => {
            // The executor already has an explicit successor from
            // `execute`; a continuation that became ready can't also
            // occupy the bypass slot, so it goes onto the local deque
            // instead (§4.3: "...or spawn it onto the local deque
            // otherwise").
            if let Some(ready) = bypass {
                scheduler.local(worker).push(ready);
            }
            Some(n)
        }
        None => bypass,
    }
}

/// The recursive completion cascade (§4.3 "Completion handling").
///
/// `task`'s reference count has just reached exactly 1 (its own permanent
/// self-reference, no outstanding children) — it is ready to be retired.
/// This notifies `task`'s parent, recursing into the parent's own
/// completion if the parent was itself only waiting on `task` as its last
/// child, and finally destroys `task`.
///
/// Returns `Some(continuation)` when finishing `task` (or a task further up
/// the chain) caused a continuation to become ready to run; that
/// continuation has *not* been destroyed or queued — the caller is
/// responsible for running or scheduling it.
fn finish_task(scheduler: &MicroScheduler, task: TaskRef) -> Option<TaskRef> {
    debug_assert_eq!(task.ref_count(), 1, "finish_task requires no outstanding children");

    let bypass = match task.parent() {
        None => None,
        Some(parent) => {
            if parent.state().contains(State::WAITING_DUMMY) {
                // §4.3: "set parent.refCount to 0" releases the external
                // waiter directly, bypassing the ordinary decrement path.
                tracing::trace!(?task, waiter = ?parent, "releasing external waiter");
                parent.force_zero();
                parent.notify_waiter();
                None
            } else {
                let remaining = parent.remove_ref(1);
                if remaining == 1 {
                    if parent.state().contains(State::CONTINUATION) {
                        // The parent link was really a continuation's
                        // bookkeeping edge: all of the continuation's
                        // contributors have now reported in, so it runs.
                        tracing::trace!(?task, continuation = ?parent, "continuation ready, bypassing deque");
                        parent.remove_state(State::CONTINUATION);
                        Some(parent)
                    } else {
                        // Parent already executed and was only waiting on
                        // its children; it is ready to retire itself.
                        finish_task(scheduler, parent)
                    }
                } else {
                    // Parent still has other outstanding children.
                    None
                }
            }
        }
    };

    task.destroy();
    bypass
}

/// The task-selection chain (§4.3): local deque, boosted lower-priority
/// band, affinity queue, shared queue, external victims, then a random
/// steal. Each step is tried in order; the first hit wins.
///
/// `pop_boosted` is tried *before* `pop_local`, not after: §4.3 describes the
/// boost as the worker actively "selecting" a lower-priority band once its
/// age counter expires, not a fallback consulted only when the normal band
/// is empty. `pop_boosted` already no-ops internally while the counter is
/// still positive, so on every non-expiring cycle this is equivalent to
/// trying local first; the reordering only changes behavior on the cycle
/// where the counter has actually expired, which is the one starvation
/// avoidance depends on — a flood of priority-0 tasks keeps the normal band
/// non-empty forever, so a local-first fallback would never yield to a
/// boosted band at all (see DESIGN.md).
pub(crate) fn select_next(
    scheduler: &MicroScheduler,
    worker: usize,
    rng: &mut Rng,
) -> Option<TaskRef> {
    let local = scheduler.local(worker);
    local
        .pop_boosted()
        .or_else(|| local.pop_local())
        .or_else(|| local.pop_affinity())
        .or_else(|| scheduler.pop_shared(worker))
        .or_else(|| scheduler.pop_external(worker))
        .or_else(|| scheduler.steal_any(worker, rng))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Priority;
    use crate::test_util::test_scheduler;

    #[test]
    fn leaf_task_with_no_children_is_destroyed_on_completion() {
        let (_pool, scheduler) = test_scheduler(1);
        let done = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let done2 = std::sync::Arc::clone(&done);
        let task = TaskRef::allocate(
            move |_cx: &Context<'_>| {
                done2.store(true, std::sync::atomic::Ordering::SeqCst);
                None
            },
            Priority::NORMAL,
        )
        .unwrap();
        let next = run_task(&scheduler, 0, task);
        assert!(next.is_none());
        assert!(done.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn parent_with_one_child_cascades_on_childs_completion() {
        let (_pool, scheduler) = test_scheduler(1);
        let parent = TaskRef::allocate(|_cx: &Context<'_>| None, Priority::NORMAL).unwrap();
        let child = TaskRef::allocate(|_cx: &Context<'_>| None, Priority::NORMAL).unwrap();
        parent.add_child(child);

        // Running the parent first: it has a child outstanding, so it must
        // not be destroyed or freed yet (implicit wait).
        assert_eq!(parent.ref_count(), 2);
        let parent_next = run_task(&scheduler, 0, parent);
        assert!(parent_next.is_none());
        assert_eq!(parent.ref_count(), 1);

        // Running the child completes it, which cascades into finishing
        // the parent too.
        let child_next = run_task(&scheduler, 0, child);
        assert!(child_next.is_none());
    }

    #[test]
    fn recycled_task_re_executes_until_flag_cleared() {
        let (_pool, scheduler) = test_scheduler(1);
        let runs = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let runs2 = std::sync::Arc::clone(&runs);
        let task = TaskRef::allocate(
            move |cx: &Context<'_>| {
                let n = runs2.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                if n < 2 {
                    cx.current_task().insert_state(State::RECYCLE);
                }
                None
            },
            Priority::NORMAL,
        )
        .unwrap();
        run_task(&scheduler, 0, task);
        assert_eq!(runs.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[test]
    fn continuation_runs_only_after_both_predecessors_report_in() {
        let (_pool, scheduler) = test_scheduler(1);
        let grandparent = TaskRef::allocate(|_cx: &Context<'_>| None, Priority::NORMAL).unwrap();
        let ran = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let ran2 = std::sync::Arc::clone(&ran);
        let continuation =
            TaskRef::allocate(move |_cx: &Context<'_>| {
                ran2.store(true, std::sync::atomic::Ordering::SeqCst);
                None
            }, Priority::NORMAL)
            .unwrap();
        grandparent.add_child(continuation);

        let left = TaskRef::allocate(|_cx: &Context<'_>| None, Priority::NORMAL).unwrap();
        let right = TaskRef::allocate(|_cx: &Context<'_>| None, Priority::NORMAL).unwrap();
        left.set_parent(Some(continuation));
        right.set_parent(Some(continuation));
        continuation.add_ref(2);
        continuation.remove_ref(1); // back down to the 1 contributed by grandparent's add_child

        let left_next = run_task(&scheduler, 0, left);
        assert!(left_next.is_none());
        assert!(!ran.load(std::sync::atomic::Ordering::SeqCst));

        let right_next = run_task(&scheduler, 0, right);
        assert_eq!(right_next, Some(continuation));
        assert!(!ran.load(std::sync::atomic::Ordering::SeqCst));

        let cont_next = run_task(&scheduler, 0, continuation);
        assert!(cont_next.is_none());
        assert!(ran.load(std::sync::atomic::Ordering::SeqCst));
    }
}
