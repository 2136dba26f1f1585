// Copyright 2026 microsched contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The micro-scheduler façade (§4.5): task allocation, spawn/queue/wait,
//! isolation scopes, external-victim wiring, and the active/inactive flag.
//!
//! A [`MicroScheduler`] registers with exactly one [`crate::WorkerPool`] (or
//! [`crate::pool::Partition`]) at construction and stays registered for its
//! lifetime; one [`crate::local::LocalScheduler`] is allocated per worker
//! index the host grants it, sized once and never resized (see DESIGN.md for
//! why this sidesteps needing the halt barrier to protect a per-worker array
//! resize, even though the barrier itself is still implemented and used for
//! pool-wide registration bookkeeping).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use spin::RwLock;

use crate::backoff::{Backoff, BackoffAction, BackoffConfig};
use crate::callbacks::Callbacks;
use crate::error::{IsolationCycle, SpawnError};
use crate::id::{self, SchedulerId};
use crate::local::LocalScheduler;
use crate::pool::{PoolShared, WorkerHost};
use crate::queue::SharedQueue;
use crate::rng::Rng;
use crate::task::{self, Context, Priority, TaskBuilder, TaskFn, TaskRef, MAX_PRIORITIES};

/// Tunable shape of a [`MicroScheduler`] (§12, added): active priority
/// bands, the priority-boost-age default, and the affinity queue's
/// soft-capacity hint.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    /// Number of priority bands actually in play (clamped to
    /// `1..=MAX_PRIORITIES`); bands beyond this are allocated but never
    /// selected by the boost rotation.
    pub priorities: usize,
    /// Initial value of the priority-boost-age counter (§4.3).
    pub boost_age: i32,
    /// Soft hint for the affinity queue; the underlying lock-free queue is
    /// unbounded, so this is accepted for API completeness and surfaced
    /// through [`SchedulerConfig::affinity_queue_capacity`] but not enforced
    /// as a hard limit. See DESIGN.md.
    pub affinity_queue_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            priorities: MAX_PRIORITIES,
            boost_age: 64,
            affinity_queue_capacity: 1024,
        }
    }
}

/// Façade over a set of per-worker [`LocalScheduler`]s, a shared queue, and
/// an external-victim list (§3 "Micro-scheduler").
pub struct MicroScheduler {
    id: SchedulerId,
    pool: Arc<PoolShared>,
    worker_indices: Vec<usize>,
    locals: Vec<LocalScheduler>,
    shared_queue: SharedQueue,
    external_victims: RwLock<Vec<Arc<MicroScheduler>>>,
    active: AtomicBool,
    callbacks: Callbacks,
    backoff_config: BackoffConfig,
}

impl MicroScheduler {
    /// Registers a new scheduler with `host` (a [`crate::WorkerPool`] or a
    /// [`crate::pool::Partition`]), allocating one [`LocalScheduler`] per
    /// worker index `host` grants it.
    #[must_use]
    pub fn new(host: &impl WorkerHost, config: SchedulerConfig) -> Arc<Self> {
        let worker_indices = host.worker_indices();
        let locals = worker_indices
            .iter()
            .map(|_| LocalScheduler::new(config.priorities, config.boost_age))
            .collect();
        let scheduler = Arc::new(Self {
            id: id::next(),
            pool: Arc::clone(host.shared()),
            worker_indices,
            locals,
            shared_queue: SharedQueue::new(num_cpus_hint()),
            external_victims: RwLock::new(Vec::new()),
            active: AtomicBool::new(true),
            callbacks: Callbacks::new(),
            backoff_config: BackoffConfig::default(),
        });
        scheduler.pool.register(Arc::clone(&scheduler));
        scheduler
    }

    #[must_use]
    pub fn id(&self) -> SchedulerId {
        self.id
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// §4.5 `setActive`: inactive schedulers are skipped by workers scanning
    /// the pool's registered-scheduler list, but direct operations
    /// (`spawn`/`wait_for`/...) on an inactive scheduler still function —
    /// only the opportunistic background scan respects the flag.
    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    #[must_use]
    pub fn callbacks(&self) -> &Callbacks {
        &self.callbacks
    }

    pub(crate) fn pool_shared(&self) -> &Arc<PoolShared> {
        &self.pool
    }

    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.worker_indices.len()
    }

    fn slot_of(&self, worker: usize) -> usize {
        self.worker_indices
            .iter()
            .position(|&w| w == worker)
            .unwrap_or_else(|| panic!("worker {worker} is not part of this scheduler's host"))
    }

    pub(crate) fn local(&self, worker: usize) -> &LocalScheduler {
        &self.locals[self.slot_of(worker)]
    }

    pub(crate) fn backoff_config(&self) -> BackoffConfig {
        self.backoff_config
    }

    /// Allocates a task and immediately makes it visible to every worker
    /// through the shared queue (§4.5 `queueTask`/non-worker `spawnTask`).
    /// In-task forking should use [`Context::spawn_child`] instead, which
    /// lands on the calling worker's own deque.
    pub fn spawn<F: TaskFn>(&self, body: F, priority: Priority) -> Result<TaskRef, SpawnError> {
        if !self.is_active() {
            tracing::debug!(scheduler = ?self.id, "spawn on closed scheduler refused");
            return Err(SpawnError::Closed);
        }
        let task = TaskRef::allocate(body, priority).ok_or(SpawnError::Alloc)?;
        self.queue(task)?;
        Ok(task)
    }

    /// §4.5 `queueTask`: pushes an already-allocated task onto the shared
    /// queue and wakes one worker. Distinct from `spawn` only in that the
    /// task must already exist (used when the caller wants to allocate
    /// and configure a task — affinity, priority — before publishing it).
    pub fn queue(&self, task: TaskRef) -> Result<(), SpawnError> {
        if !self.is_active() {
            return Err(SpawnError::Closed);
        }
        if let Some(worker) = task.affinity() {
            tracing::trace!(?task, worker, "queueing task onto affinity queue");
            self.local(worker as usize).push_affinity(task);
        } else {
            tracing::trace!(?task, "queueing task onto shared queue");
            self.shared_queue.push(task.isolation_tag(), task);
        }
        self.pool.wake_one();
        Ok(())
    }

    pub(crate) fn spawn_child<F: TaskFn>(
        &self,
        cx: &Context<'_>,
        body: F,
        priority: Priority,
    ) -> Result<TaskRef, SpawnError> {
        let child = TaskRef::allocate(body, priority).ok_or(SpawnError::Alloc)?;
        self.adopt_child(cx, child);
        Ok(child)
    }

    /// Backs [`Context::adopt_child`]: links `child` into the graph as a
    /// child of `cx`'s current task and publishes it to the right queue for
    /// its affinity. Shared by [`Self::spawn_child`] and
    /// [`Self::spawn_child_with`], which only differ in how `child` gets
    /// allocated.
    pub(crate) fn adopt_child(&self, cx: &Context<'_>, child: TaskRef) {
        cx.current_task().add_child(child);
        if let Some(worker) = child.affinity() {
            self.local(worker as usize).push_affinity(child);
        } else {
            self.local(cx.worker_index()).push(child);
        }
    }

    /// Backs [`Context::spawn_child_with`]: same as [`Self::spawn_child`] but
    /// the task comes from a pre-configured [`TaskBuilder`] (affinity and/or
    /// a non-default priority) rather than a bare closure.
    pub(crate) fn spawn_child_with<F: TaskFn>(
        &self,
        cx: &Context<'_>,
        builder: TaskBuilder,
        body: F,
    ) -> Result<TaskRef, SpawnError> {
        let child = builder.build(body).ok_or(SpawnError::Alloc)?;
        self.adopt_child(cx, child);
        Ok(child)
    }

    /// §4.5 `isolate`: runs `f` with a fresh isolation tag set on the
    /// calling worker's local scheduler, restoring the previous tag on
    /// exit (including on unwind, so a panicking task body never leaves
    /// the worker stuck isolated).
    pub(crate) fn isolate<R>(&self, cx: &Context<'_>, f: impl FnOnce(&Context<'_>) -> R) -> R {
        let local = self.local(cx.worker_index());
        let tag = fresh_isolation_tag();
        let previous = local.set_isolation_tag(tag);
        tracing::trace!(worker = cx.worker_index(), tag, "entering isolation scope");
        struct Restore<'a> {
            local: &'a LocalScheduler,
            previous: usize,
            worker: usize,
        }
        impl Drop for Restore<'_> {
            fn drop(&mut self) {
                self.local.set_isolation_tag(self.previous);
                tracing::trace!(worker = self.worker, "leaving isolation scope");
            }
        }
        let _restore = Restore {
            local,
            previous,
            worker: cx.worker_index(),
        };
        let inner_cx = Context::new(self, cx.worker_index(), cx.current_task());
        f(&inner_cx)
    }

    /// §4.5 `addExternalVictim`: our workers may steal from `other`'s
    /// deques once their own local/affinity/shared sources are exhausted.
    /// Refuses edges that would create a cycle (§7, Open Question (b)).
    pub fn add_external_victim(self: &Arc<Self>, other: &Arc<MicroScheduler>) -> Result<(), IsolationCycle> {
        if Arc::ptr_eq(self, other) || reaches(other, self) {
            tracing::debug!(from = ?self.id, to = ?other.id, "refusing external victim edge, would cycle");
            return Err(IsolationCycle);
        }
        tracing::debug!(from = ?self.id, to = ?other.id, "registered external victim");
        self.external_victims.write().push(Arc::clone(other));
        Ok(())
    }

    pub(crate) fn external_victims(&self) -> Vec<Arc<MicroScheduler>> {
        self.external_victims.read().clone()
    }

    pub(crate) fn pop_shared(&self, worker: usize) -> Option<TaskRef> {
        self.shared_queue.pop(worker)
    }

    pub(crate) fn pop_external(&self, worker: usize) -> Option<TaskRef> {
        for victim in self.external_victims.read().iter() {
            if let Some(task) = victim.shared_queue.pop(worker) {
                return Some(task);
            }
        }
        None
    }

    /// Uniform-random steal over "workers in my worker pool ∪ workers
    /// reachable through external victims" (§4.3). Self is never a
    /// candidate.
    pub(crate) fn steal_any(&self, worker: usize, rng: &mut Rng) -> Option<TaskRef> {
        let my_tag = self.local(worker).isolation_tag();
        let my_slot = self.slot_of(worker);

        if self.locals.len() > 1 {
            let mut candidates: Vec<usize> = (0..self.locals.len()).filter(|&i| i != my_slot).collect();
            shuffle(&mut candidates, rng);
            for victim_slot in candidates {
                if let Some(task) = self.local(worker).steal_from(&self.locals[victim_slot], my_tag) {
                    return Some(task);
                }
            }
        }

        for victim in self.external_victims.read().iter() {
            if victim.locals.is_empty() {
                continue;
            }
            let pick = rng.usize(..victim.locals.len());
            let order = (0..victim.locals.len()).map(|i| (pick + i) % victim.locals.len());
            for victim_slot in order {
                if let Some(task) = self.local(worker).steal_from(&victim.locals[victim_slot], my_tag) {
                    return Some(task);
                }
            }
        }
        None
    }

    /// Whether this scheduler has any task reachable without stealing:
    /// used as the global-quiescence check before a worker parks (§4.3
    /// "if !scheduler.has_any_tasks(): return").
    pub(crate) fn has_any_tasks(&self) -> bool {
        if !self.shared_queue.is_empty() {
            return true;
        }
        if self.locals.iter().any(|l| !l.approx_empty()) {
            return true;
        }
        self.external_victims
            .read()
            .iter()
            .any(|v| v.has_any_tasks())
    }

    /// §4.5 `spawnTaskAndWait`: spawns `task` (already allocated, not yet
    /// published) onto the shared queue, then blocks the calling thread
    /// until it completes, parking rather than busy-spinning when idle
    /// (§14's antipattern-guard resolution).
    ///
    /// If the calling thread is the one that built the pool (i.e. it plays
    /// worker 0 whenever it enters a wait), this cooperatively pumps worker
    /// 0's executor loop instead of merely parking — otherwise a task
    /// pinned to affinity 0 would never be serviced, since worker 0 has no
    /// background thread of its own (see DESIGN.md).
    pub fn spawn_and_wait(&self, task: TaskRef) {
        debug_assert!(task.parent().is_none(), "task already has a parent");
        let (dummy, signal) = task::new_wait_dummy();
        task.set_parent(Some(dummy));
        if let Some(worker) = task.affinity() {
            self.local(worker as usize).push_affinity(task);
        } else {
            self.shared_queue.push(task.isolation_tag(), task);
        }
        self.pool.wake_one();
        self.wait_on_dummy(&signal, dummy);
    }

    /// §4.5 `waitFor`: like `spawn_and_wait`, but `task` is assumed to
    /// already be running elsewhere (already queued or mid-execution), with
    /// an extra reference the caller holds on top of `task`'s own. That
    /// extra reference is exactly what keeps `finish_task` from ever
    /// destroying `task` out from under the caller: `run_task` treats any
    /// `ref_count() > 1` as "children still outstanding" and leaves `task`
    /// untouched, so with the caller's reference included the count can
    /// never cascade down to the 1-remaining state `finish_task` requires.
    /// Routing this through a `WAITING_DUMMY` parent (as `spawn_and_wait`
    /// does) would therefore deadlock — nothing would ever force the dummy
    /// to zero. Instead this polls `task`'s own ref count directly, per the
    /// table's "blocks until task.refCount ≤ 1". The caller remains
    /// responsible for calling `destroy_task` once this returns.
    pub fn wait_for(&self, task: TaskRef) {
        if self.pool.is_master_thread() {
            let mut rng = crate::rng::for_worker(0);
            let mut backoff = Backoff::new(self.backoff_config);
            crate::worker::run_scoped(self, 0, &mut rng, &mut backoff, None, || {
                task.ref_count() <= 1
            });
        } else {
            let mut backoff = Backoff::new(self.backoff_config);
            while task.ref_count() > 1 {
                if let BackoffAction::ParkReady = backoff.tick() {
                    self.pool.park();
                    backoff.reset();
                }
            }
        }
    }

    /// Shared tail of `spawn_and_wait`: block until `dummy`'s ref count has
    /// been forced to zero by the completion cascade. The pool-building
    /// thread drives worker 0's loop directly (polling `dummy`'s ref count
    /// as the stop predicate — `finish_task` already calls `notify_waiter`
    /// unconditionally, which is harmless here since nothing is blocked on
    /// the condvar); any other thread just parks on the signal.
    fn wait_on_dummy(&self, signal: &Arc<task::WaitSignal>, dummy: TaskRef) {
        if self.pool.is_master_thread() {
            let mut rng = crate::rng::for_worker(0);
            let mut backoff = Backoff::new(self.backoff_config);
            crate::worker::run_scoped(self, 0, &mut rng, &mut backoff, None, || {
                dummy.ref_count() == 0
            });
        } else {
            task::wait_on_signal(signal);
        }
        dummy.destroy();
    }

    /// §4.5 `waitForAll`: runs the executor loop, participating as
    /// `worker`, until this scheduler has no reachable work left. Per the
    /// table this is a no-op for callers that are not one of the
    /// scheduler's workers; Rust has no ambient thread-local worker
    /// identity here, so the caller names its worker index explicitly.
    pub fn wait_for_all(&self, worker: usize) {
        let mut rng = crate::rng::for_worker(worker);
        let mut backoff = Backoff::new(self.backoff_config);
        crate::worker::run_scoped(self, worker, &mut rng, &mut backoff, None, || {
            !self.has_any_tasks()
        });
    }

    /// §4.5 `destroyTask`: frees a task directly. Undefined behavior if the
    /// task is currently executing (caller's responsibility, per §7).
    pub fn destroy_task(&self, task: TaskRef) {
        task.destroy();
    }
}

impl Drop for MicroScheduler {
    fn drop(&mut self) {
        self.pool.unregister(self.id);
    }
}

fn reaches(from: &Arc<MicroScheduler>, to: &Arc<MicroScheduler>) -> bool {
    for victim in from.external_victims.read().iter() {
        if Arc::ptr_eq(victim, to) || reaches(victim, to) {
            return true;
        }
    }
    false
}

static NEXT_ISOLATION_TAG: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(1);

/// Isolation tags are never 0 (that value means "not isolated", per
/// `isolation_matches`), so the counter starts at 1.
fn fresh_isolation_tag() -> usize {
    NEXT_ISOLATION_TAG.fetch_add(1, Ordering::Relaxed)
}

fn shuffle(items: &mut [usize], rng: &mut Rng) {
    for i in (1..items.len()).rev() {
        let j = rng.usize(..=i);
        items.swap(i, j);
    }
}

fn num_cpus_hint() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1)
}
