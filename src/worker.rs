// Copyright 2026 microsched contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The OS-thread harness that drives the executor loop (§4.4 "Worker").
//!
//! Two entry points share one idle-scan pass ([`run_one_pass`]):
//! [`run_background`] for the pool's spawned `1..worker_count` threads, and
//! [`run_master`] for the calling thread driving worker 0 on demand. A third,
//! [`run_scoped`], backs [`crate::MicroScheduler`]'s wait operations — it
//! sticks to one scheduler rather than scanning every registered one, which
//! is what "wait drives the executor loop on the calling thread" (§2) means
//! for a single in-flight task rather than the pool's generic background
//! search.

use std::sync::Arc;

use crate::backoff::{Backoff, BackoffAction, BackoffConfig};
use crate::executor;
use crate::pool::PoolShared;
use crate::rng::Rng;
use crate::scheduler::MicroScheduler;
use crate::task::TaskRef;

/// One idle-scan pass over every active scheduler registered with the pool:
/// try to find and fully run one unit of bypass-chained work per scheduler.
/// Returns whether any work was found. Grounded on
/// `alliecatowo-lumen/rust/lumen-runtime/src/scheduler.rs`'s `worker_loop`,
/// which likewise tries local-then-global-then-steal once per wake before
/// falling back to a timed park.
fn run_one_pass(shared: &PoolShared, worker: usize, rng: &mut Rng) -> bool {
    let mut found_any = false;
    for scheduler in shared.registered_schedulers() {
        if !scheduler.is_active() {
            continue;
        }
        match executor::select_next(&scheduler, worker, rng) {
            Some(first) => {
                found_any = true;
                let mut task = Some(first);
                while let Some(t) = task {
                    task = executor::run_task(&scheduler, worker, t);
                }
            }
            None => scheduler.callbacks().fire_scheduler_idle(),
        }
    }
    found_any
}

fn idle_backoff(shared: &PoolShared, backoff: &mut Backoff) -> bool {
    match backoff.tick() {
        BackoffAction::ParkReady => {
            if !shared.any_registered_scheduler_has_tasks() {
                let shutting_down = shared.park();
                backoff.reset();
                return shutting_down;
            }
        }
        BackoffAction::Spin | BackoffAction::Yield => {}
    }
    false
}

/// Entry point for a pool's spawned background thread (worker index
/// `1..worker_count`). Runs until the pool shuts down.
pub(crate) fn run_background(shared: Arc<PoolShared>, worker: usize) {
    let mut rng = crate::rng::for_worker(worker);
    let mut backoff = Backoff::new(BackoffConfig::default());
    loop {
        shared.observe_halt();
        if shared.is_shutdown() {
            return;
        }
        if run_one_pass(&shared, worker, &mut rng) {
            backoff.reset();
            continue;
        }
        if idle_backoff(&shared, &mut backoff) {
            return;
        }
    }
}

/// Drives worker 0 on the calling thread (§4.4: "element 0 of the
/// descriptor array refers to the calling thread"). Returns once
/// `should_stop` reports true or the pool shuts down.
pub(crate) fn run_master(shared: &PoolShared, should_stop: impl Fn() -> bool) {
    let mut rng = crate::rng::for_worker(0);
    let mut backoff = Backoff::new(BackoffConfig::default());
    loop {
        shared.observe_halt();
        if should_stop() || shared.is_shutdown() {
            return;
        }
        if run_one_pass(shared, 0, &mut rng) {
            backoff.reset();
            continue;
        }
        if idle_backoff(shared, &mut backoff) {
            return;
        }
    }
}

/// Drives the executor loop against a single scheduler, starting from an
/// optional already-in-hand `task` (used when a task was just spawned and
/// the caller wants to help execute, e.g. `spawnTaskAndWait`). Backs
/// [`crate::MicroScheduler::wait_for`], `wait_for_all`, and
/// `spawn_and_wait`. Returns once `should_stop` is satisfied.
pub(crate) fn run_scoped(
    scheduler: &MicroScheduler,
    worker: usize,
    rng: &mut Rng,
    backoff: &mut Backoff,
    mut task: Option<TaskRef>,
    should_stop: impl Fn() -> bool,
) {
    loop {
        while let Some(t) = task {
            task = executor::run_task(scheduler, worker, t);
        }

        if should_stop() {
            return;
        }

        task = executor::select_next(scheduler, worker, rng);
        match task {
            Some(_) => backoff.reset(),
            None => {
                scheduler.callbacks().fire_scheduler_idle();
                if let BackoffAction::ParkReady = backoff.tick() {
                    if !scheduler.has_any_tasks() {
                        scheduler.callbacks().fire_before_sleep(worker);
                        let shutting_down = scheduler.pool_shared().park();
                        scheduler.callbacks().fire_after_wake(worker);
                        if shutting_down {
                            return;
                        }
                        backoff.reset();
                    }
                }
            }
        }
    }
}
