// Copyright 2026 microsched contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A ping-pong benchmark: two tasks each request `PINGS` rounds of
//! `Context::recycle` — re-entering the executor's selection chain on every
//! round without being retired — racing each other to completion under a
//! shared parent.

use criterion::{criterion_group, criterion_main, Criterion};
use microsched::{Context, MicroScheduler, Priority, SchedulerConfig, TaskRef, WorkerPoolBuilder};
use std::sync::atomic::{AtomicUsize, Ordering};

const PINGS: usize = 10_000;

fn recycling_leaf(rounds: usize) -> impl FnMut(&Context<'_>) -> Option<TaskRef> {
    let remaining = AtomicUsize::new(rounds);
    move |cx: &Context<'_>| {
        if remaining.fetch_sub(1, Ordering::Relaxed) > 1 {
            cx.recycle();
        }
        None
    }
}

fn ping_10k_single_threaded(c: &mut Criterion) {
    let pool = WorkerPoolBuilder::new().workers(1).build();
    let scheduler = MicroScheduler::new(&pool, SchedulerConfig::default());

    c.bench_function("ping_10k_single_threaded", |b| {
        b.iter(|| {
            let task = TaskRef::allocate(recycling_leaf(PINGS), Priority::NORMAL).unwrap();
            scheduler.spawn_and_wait(task);
        });
    });

    pool.shutdown();
}

fn ping_pong_10k_single_threaded(c: &mut Criterion) {
    let pool = WorkerPoolBuilder::new().workers(1).build();
    let scheduler = MicroScheduler::new(&pool, SchedulerConfig::default());

    c.bench_function("ping_pong_10k_single_threaded", |b| {
        b.iter(|| {
            let parent = TaskRef::allocate(
                |cx: &Context<'_>| {
                    cx.spawn_child(recycling_leaf(PINGS), Priority::NORMAL)
                        .unwrap();
                    cx.spawn_child(recycling_leaf(PINGS), Priority::NORMAL)
                        .unwrap();
                    None
                },
                Priority::NORMAL,
            )
            .unwrap();
            scheduler.spawn_and_wait(parent);
        });
    });

    pool.shutdown();
}

fn ping_10k_multi_threaded(c: &mut Criterion) {
    let pool = WorkerPoolBuilder::new().workers(2).build();
    let scheduler = MicroScheduler::new(&pool, SchedulerConfig::default());

    c.bench_function("ping_10k_multi_threaded", |b| {
        b.iter(|| {
            let task = TaskRef::allocate(recycling_leaf(PINGS), Priority::NORMAL).unwrap();
            scheduler.spawn_and_wait(task);
        });
    });

    pool.shutdown();
}

fn ping_pong_10k_multi_threaded(c: &mut Criterion) {
    let pool = WorkerPoolBuilder::new().workers(2).build();
    let scheduler = MicroScheduler::new(&pool, SchedulerConfig::default());

    c.bench_function("ping_pong_10k_multi_threaded", |b| {
        b.iter(|| {
            let parent = TaskRef::allocate(
                |cx: &Context<'_>| {
                    cx.spawn_child(recycling_leaf(PINGS), Priority::NORMAL)
                        .unwrap();
                    cx.spawn_child(recycling_leaf(PINGS), Priority::NORMAL)
                        .unwrap();
                    None
                },
                Priority::NORMAL,
            )
            .unwrap();
            scheduler.spawn_and_wait(parent);
        });
    });

    pool.shutdown();
}

criterion_group!(
    ping_pong,
    ping_10k_single_threaded,
    ping_pong_10k_single_threaded,
    ping_10k_multi_threaded,
    ping_pong_10k_multi_threaded,
);
criterion_main!(ping_pong);
