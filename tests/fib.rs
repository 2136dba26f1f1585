// Copyright 2026 microsched contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! S1: Fibonacci(10), exercising spawn, continuations, and the recursive
//! completion cascade together.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use microsched::{Context, MicroScheduler, Priority, SchedulerConfig, TaskRef, WorkerPoolBuilder};

fn fib_task(n: u64, out: Arc<AtomicI64>) -> impl FnMut(&Context<'_>) -> Option<TaskRef> {
    move |cx: &Context<'_>| {
        if n <= 2 {
            out.store(1, Ordering::SeqCst);
            return None;
        }
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
        cx.spawn_child(fib_task(n - 1, left_out), Priority::NORMAL)
            .unwrap();
        cx.spawn_child(fib_task(n - 2, right_out), Priority::NORMAL)
            .unwrap();
        None
    }
}

#[test]
fn fib_10_is_55() {
    let pool = WorkerPoolBuilder::new().workers(4).build();
    let scheduler = MicroScheduler::new(&pool, SchedulerConfig::default());

    let out = Arc::new(AtomicI64::new(0));
    let root = TaskRef::allocate(fib_task(10, Arc::clone(&out)), Priority::NORMAL).unwrap();
    scheduler.spawn_and_wait(root);

    assert_eq!(out.load(Ordering::SeqCst), 55);
    pool.shutdown();
}

#[test]
fn fib_10_is_55_single_worker() {
    let pool = WorkerPoolBuilder::new().workers(1).build();
    let scheduler = MicroScheduler::new(&pool, SchedulerConfig::default());

    let out = Arc::new(AtomicI64::new(0));
    let root = TaskRef::allocate(fib_task(10, Arc::clone(&out)), Priority::NORMAL).unwrap();
    scheduler.spawn_and_wait(root);

    assert_eq!(out.load(Ordering::SeqCst), 55);
    pool.shutdown();
}
