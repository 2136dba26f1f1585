// Copyright 2026 microsched contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Shared test scaffolding: a scheduler with exactly `worker_count` slots and
//! no background threads, so unit tests can drive `run_task`/`select_next`
//! by hand without racing a real worker loop.

use std::sync::Arc;

use crate::pool::{WorkerPool, WorkerPoolBuilder};
use crate::scheduler::{MicroScheduler, SchedulerConfig};

/// Builds a single-scheduler pool with `worker_count` slots. With
/// `worker_count == 1` the pool spawns no background threads at all (worker
/// 0 is always the calling thread), which is what every `executor`/`local`
/// unit test wants: full manual control over when a task runs.
pub(crate) fn test_scheduler(worker_count: usize) -> (WorkerPool, Arc<MicroScheduler>) {
    let pool = WorkerPoolBuilder::new().workers(worker_count).build();
    let scheduler = MicroScheduler::new(&pool, SchedulerConfig::default());
    (pool, scheduler)
}
