// Copyright 2026 microsched contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Scheduler-wide callback hooks (§4.5 "Callbacks"): `before-worker-sleep`,
//! `after-worker-wake`, `on-task-executed`, `on-scheduler-idle`.
//!
//! Protected by a `spin::RwLock` per §5's "Callback list: rw-spinlock, read
//! at call point, write rare" — registration happens once at setup, the hot
//! path only ever reads.

use spin::RwLock;
use std::sync::Arc;

use crate::task::TaskRef;

type BeforeSleep = Arc<dyn Fn(usize) + Send + Sync>;
type AfterWake = Arc<dyn Fn(usize) + Send + Sync>;
type OnTaskExecuted = Arc<dyn Fn(usize, TaskRef) + Send + Sync>;
type OnSchedulerIdle = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Hooks {
    before_sleep: Option<BeforeSleep>,
    after_wake: Option<AfterWake>,
    on_task_executed: Option<OnTaskExecuted>,
    on_scheduler_idle: Option<OnSchedulerIdle>,
}

/// Registry of the four callback points a host may hook into. Callbacks run
/// on worker threads at well-defined points in the executor loop and must
/// not call back into `spawn`/`wait` on that same worker (§4.5).
#[derive(Default)]
pub struct Callbacks {
    hooks: RwLock<Hooks>,
}

impl Callbacks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs immediately before a worker parks due to exhausted backoff.
    pub fn on_before_sleep(&self, f: impl Fn(usize) + Send + Sync + 'static) {
        self.hooks.write().before_sleep = Some(Arc::new(f));
    }

    /// Runs immediately after a parked worker is woken.
    pub fn on_after_wake(&self, f: impl Fn(usize) + Send + Sync + 'static) {
        self.hooks.write().after_wake = Some(Arc::new(f));
    }

    /// Runs after every task execution, successful or not.
    pub fn on_task_executed(&self, f: impl Fn(usize, TaskRef) + Send + Sync + 'static) {
        self.hooks.write().on_task_executed = Some(Arc::new(f));
    }

    /// Runs when a worker's task-selection chain finds nothing across every
    /// source (local, affinity, shared, external, steal) on a given pass.
    pub fn on_scheduler_idle(&self, f: impl Fn() + Send + Sync + 'static) {
        self.hooks.write().on_scheduler_idle = Some(Arc::new(f));
    }

    pub(crate) fn fire_before_sleep(&self, worker: usize) {
        if let Some(f) = self.hooks.read().before_sleep.as_ref() {
            f(worker);
        }
    }

    pub(crate) fn fire_after_wake(&self, worker: usize) {
        if let Some(f) = self.hooks.read().after_wake.as_ref() {
            f(worker);
        }
    }

    pub(crate) fn fire_task_executed(&self, worker: usize, task: TaskRef) {
        if let Some(f) = self.hooks.read().on_task_executed.as_ref() {
            f(worker, task);
        }
    }

    pub(crate) fn fire_scheduler_idle(&self) {
        if let Some(f) = self.hooks.read().on_scheduler_idle.as_ref() {
            f();
        }
    }
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks").finish_non_exhaustive()
    }
}
