// Copyright 2026 microsched contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! S6: isolation scopes (§4.5 `isolate`, testable property 7) — an outer
//! parallel-for body that runs a nested parallel-for inside `isolate` must
//! see its own per-worker state survive the nested scope untouched, and the
//! inner fan-out must itself run to completion correctly while tagged.

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

use microsched::{Context, MicroScheduler, Priority, SchedulerConfig, TaskRef, WorkerPoolBuilder};

const WORKERS: usize = 4;
const OUTER_COUNT: usize = 8;
const INNER_PER_OUTER: usize = 4;

#[test]
fn isolated_inner_fan_out_leaves_outer_state_intact() {
    let pool = WorkerPoolBuilder::new().workers(WORKERS).build();
    let scheduler = MicroScheduler::new(&pool, SchedulerConfig::default());

    let before: Arc<Vec<AtomicI64>> = Arc::new((0..WORKERS).map(|_| AtomicI64::new(-1)).collect());
    let after: Arc<Vec<AtomicI64>> = Arc::new((0..WORKERS).map(|_| AtomicI64::new(-1)).collect());
    let inner_ran = Arc::new(AtomicUsize::new(0));

    for _ in 0..OUTER_COUNT {
        let before = Arc::clone(&before);
        let after = Arc::clone(&after);
        let inner_ran = Arc::clone(&inner_ran);

        scheduler
            .spawn(
                move |cx: &Context<'_>| {
                    let w = cx.worker_index();
                    before[w].store(w as i64, Ordering::SeqCst);

                    // The continuation only runs once every inner child
                    // spawned below has completed (the ordinary implicit
                    // wait cascade), regardless of which worker finishes
                    // last — so `after[w]` reflects the state of worker `w`
                    // once the isolated nested fan-out has fully drained.
                    let after_for_cont = Arc::clone(&after);
                    let continuation = TaskRef::allocate(
                        move |_cx: &Context<'_>| {
                            after_for_cont[w].store(w as i64, Ordering::SeqCst);
                            None
                        },
                        Priority::NORMAL,
                    )
                    .unwrap();
                    cx.current_task().set_continuation(continuation);

                    cx.isolate(|inner_cx: &Context<'_>| {
                        for _ in 0..INNER_PER_OUTER {
                            let inner_ran = Arc::clone(&inner_ran);
                            inner_cx
                                .spawn_child(
                                    move |_cx: &Context<'_>| {
                                        inner_ran.fetch_add(1, Ordering::SeqCst);
                                        None
                                    },
                                    Priority::NORMAL,
                                )
                                .unwrap();
                        }
                    });
                    None
                },
                Priority::NORMAL,
            )
            .unwrap();
    }

    scheduler.wait_for_all(0);

    assert_eq!(inner_ran.load(Ordering::SeqCst), OUTER_COUNT * INNER_PER_OUTER);
    for w in 0..WORKERS {
        let b = before[w].load(Ordering::SeqCst);
        let a = after[w].load(Ordering::SeqCst);
        if b != -1 {
            assert_eq!(b, a, "worker {w}'s state was clobbered across its isolate call");
        }
    }
    pool.shutdown();
}
