// Copyright 2026 microsched contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! S2: parallel-for sum over `0..1000`, built directly out of spawn/wait
//! rather than a dedicated parallel-for skeleton (out of scope per spec.md
//! §1 — "specified abstractly only insofar as they exercise the core").

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use microsched::{Context, MicroScheduler, Priority, SchedulerConfig, TaskRef, WorkerPoolBuilder};

const LEAF_SIZE: u64 = 32;

fn range_sum_task(lo: u64, hi: u64, out: Arc<AtomicI64>) -> impl FnMut(&Context<'_>) -> Option<TaskRef> {
    move |cx: &Context<'_>| {
        if hi - lo <= LEAF_SIZE {
            let sum: i64 = (lo..hi).map(|i| i as i64).sum();
            out.store(sum, Ordering::SeqCst);
            return None;
        }
        let mid = lo + (hi - lo) / 2;
        let left_out = Arc::new(AtomicI64::new(0));
        let right_out = Arc::new(AtomicI64::new(0));
        let sum_left = Arc::clone(&left_out);
        let sum_right = Arc::clone(&right_out);
        let sum_out = Arc::clone(&out);
        let continuation = TaskRef::allocate(
            move |_cx: &Context<'_>| {
                let total = sum_left.load(Ordering::SeqCst) + sum_right.load(Ordering::SeqCst);
                sum_out.store(total, Ordering::SeqCst);
                None
            },
            Priority::NORMAL,
        )
        .unwrap();
        cx.current_task().set_continuation(continuation);
        cx.spawn_child(range_sum_task(lo, mid, left_out), Priority::NORMAL)
            .unwrap();
        cx.spawn_child(range_sum_task(mid, hi, right_out), Priority::NORMAL)
            .unwrap();
        None
    }
}

#[test]
fn sum_0_to_999_is_499500() {
    let pool = WorkerPoolBuilder::new().workers(4).build();
    let scheduler = MicroScheduler::new(&pool, SchedulerConfig::default());

    let out = Arc::new(AtomicI64::new(0));
    let root = TaskRef::allocate(range_sum_task(0, 1000, Arc::clone(&out)), Priority::NORMAL).unwrap();
    scheduler.spawn_and_wait(root);

    assert_eq!(out.load(Ordering::SeqCst), 499_500);
    pool.shutdown();
}
