// Copyright 2026 microsched contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Worker pool (§4.4): owns the OS threads, the halt/resume registration
//! barrier, the sleep/wake condition, and partitioning.
//!
//! Worker index 0 ("master") never gets its own spawned thread — per §4.4,
//! it is "a Worker that executes when the caller enters the loop via wait",
//! i.e. whichever thread built the pool drives worker 0 on demand by calling
//! a blocking [`crate::MicroScheduler`] operation. Indices `1..worker_count`
//! get real background threads running [`crate::worker::run`] continuously.

use std::hint;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{JoinHandle, ThreadId};
use std::time::Duration;

use spin::RwLock;

use crate::scheduler::MicroScheduler;

/// Per-worker configuration passed to [`WorkerPoolBuilder::worker`].
///
/// `affinity`/`os_priority` are accepted for API completeness (§4.4
/// "optionally set affinity masks, priorities, and names") but, absent a
/// platform-affinity crate in this dependency set, are not applied to the
/// underlying OS thread — see DESIGN.md.
#[derive(Debug, Clone, Default)]
pub struct WorkerDesc {
    pub name: Option<String>,
    pub affinity: Option<usize>,
    pub os_priority: Option<i32>,
}

impl WorkerDesc {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn affinity(mut self, core: usize) -> Self {
        self.affinity = Some(core);
        self
    }
}

/// Shared pool state reachable from every worker thread and from every
/// [`MicroScheduler`] registered with this pool.
pub(crate) struct PoolShared {
    worker_count: usize,
    shutdown: AtomicBool,
    halting: AtomicBool,
    halted: AtomicUsize,
    suspended: AtomicUsize,
    park_lock: Mutex<()>,
    park_cv: Condvar,
    registered: RwLock<Vec<Arc<MicroScheduler>>>,
    master_thread: ThreadId,
}

impl PoolShared {
    fn new(worker_count: usize) -> Self {
        Self {
            worker_count,
            shutdown: AtomicBool::new(false),
            halting: AtomicBool::new(false),
            halted: AtomicUsize::new(0),
            suspended: AtomicUsize::new(0),
            park_lock: Mutex::new(()),
            park_cv: Condvar::new(),
            registered: RwLock::new(Vec::new()),
            master_thread: std::thread::current().id(),
        }
    }

    /// Whether the calling thread is the one that built this pool, i.e. the
    /// thread that plays worker 0 ("master") whenever it enters a wait
    /// operation. Used by [`crate::MicroScheduler`]'s wait methods to decide
    /// whether to cooperatively pump worker 0's loop or just park (§4.4,
    /// §4.5 Open Question (c)): a non-master waiter parks, since it has no
    /// worker index of its own to drive without racing the real worker 0.
    pub(crate) fn is_master_thread(&self) -> bool {
        std::thread::current().id() == self.master_thread
    }

    pub(crate) fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub(crate) fn is_halting(&self) -> bool {
        self.halting.load(Ordering::Acquire)
    }

    /// Called by a worker thread at the top of its loop (§4.4 step 3): if
    /// the pool is halting, acknowledge and spin until it resumes.
    pub(crate) fn observe_halt(&self) {
        if !self.is_halting() {
            return;
        }
        self.halted.fetch_add(1, Ordering::Release);
        while self.is_halting() {
            hint::spin_loop();
        }
        self.halted.fetch_sub(1, Ordering::Release);
    }

    /// Steps 1-4: request a halt and wait for every background thread to
    /// acknowledge it. Only background threads (`1..worker_count`) are
    /// counted — registration is assumed to be driven from the pool-owning
    /// ("master") thread, which by definition is not concurrently executing
    /// a task while it is itself the one calling this. See DESIGN.md.
    fn begin_halt(&self) {
        tracing::debug!("halt barrier: requesting quiescence");
        self.halting.store(true, Ordering::Release);
        self.wake_all();
        let target = self.worker_count.saturating_sub(1);
        while self.halted.load(Ordering::Acquire) < target {
            hint::spin_loop();
        }
        tracing::debug!("halt barrier: all workers quiesced");
    }

    /// Steps 5-6 happen around the caller's own mutation; this just clears
    /// the flag and wakes everyone back up.
    fn end_halt(&self) {
        self.halting.store(false, Ordering::Release);
        self.wake_all();
        tracing::debug!("halt barrier: resumed");
    }

    pub(crate) fn wake_one(&self) {
        self.park_cv.notify_one();
    }

    fn wake_all(&self) {
        self.park_cv.notify_all();
    }

    /// Parks the calling worker for a short, bounded interval (grounded on
    /// `alliecatowo-lumen/rust/lumen-runtime/src/scheduler.rs`'s
    /// `thread::park_timeout`-based idle wait, adapted to a pool-wide
    /// condition so `wake_one` can target any parked worker). Returns
    /// `true` if the pool has been shut down while parked.
    pub(crate) fn park(&self) -> bool {
        self.suspended.fetch_add(1, Ordering::Relaxed);
        tracing::trace!("parking idle worker");
        {
            let guard = self.park_lock.lock().unwrap();
            let _ = self.park_cv.wait_timeout(guard, Duration::from_millis(2));
        }
        self.suspended.fetch_sub(1, Ordering::Relaxed);
        tracing::trace!("worker resumed from park");
        self.is_shutdown()
    }

    pub(crate) fn any_registered_scheduler_has_tasks(&self) -> bool {
        self.registered
            .read()
            .iter()
            .any(|s| s.is_active() && s.has_any_tasks())
    }

    pub(crate) fn registered_schedulers(&self) -> Vec<Arc<MicroScheduler>> {
        self.registered.read().clone()
    }

    pub(crate) fn register(&self, scheduler: Arc<MicroScheduler>) {
        self.begin_halt();
        self.registered.write().push(scheduler);
        self.end_halt();
    }

    pub(crate) fn unregister(&self, id: crate::id::SchedulerId) {
        self.begin_halt();
        self.registered.write().retain(|s| s.id() != id);
        self.end_halt();
    }
}

/// Accessor shared by [`WorkerPool`] and [`Partition`] so
/// [`MicroScheduler::new`](crate::scheduler::MicroScheduler::new) can
/// register against either.
pub(crate) trait WorkerHost {
    fn shared(&self) -> &Arc<PoolShared>;
    /// Worker indices this host may dispatch onto (a partition restricts
    /// this; a whole pool is `0..worker_count`).
    fn worker_indices(&self) -> Vec<usize>;
}

/// Builds a [`WorkerPool`] from a list of per-worker descriptors.
#[derive(Default)]
pub struct WorkerPoolBuilder {
    workers: Vec<WorkerDesc>,
}

impl WorkerPoolBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one worker descriptor. The first call corresponds to worker
    /// index 0, the "master" worker driven by whichever thread calls
    /// [`WorkerPoolBuilder::build`] and later blocks in a wait operation.
    #[must_use]
    pub fn worker(mut self, desc: WorkerDesc) -> Self {
        self.workers.push(desc);
        self
    }

    /// Convenience: appends `count` default-configured workers.
    #[must_use]
    pub fn workers(mut self, count: usize) -> Self {
        self.workers.extend((0..count).map(|_| WorkerDesc::new()));
        self
    }

    /// Spawns one OS thread per descriptor beyond index 0 and returns the
    /// running pool.
    #[must_use]
    pub fn build(self) -> WorkerPool {
        let worker_count = self.workers.len().max(1);
        let shared = Arc::new(PoolShared::new(worker_count));
        let mut threads = Vec::with_capacity(worker_count.saturating_sub(1));
        for idx in 1..worker_count {
            let shared = Arc::clone(&shared);
            let desc = self.workers.get(idx).cloned().unwrap_or_default();
            let mut builder = std::thread::Builder::new();
            if let Some(name) = desc.name {
                builder = builder.name(name);
            }
            let handle = builder
                .spawn(move || crate::worker::run_background(shared, idx))
                .expect("failed to spawn worker thread");
            threads.push(handle);
        }
        WorkerPool {
            shared,
            threads: Mutex::new(threads),
        }
    }
}

/// Owns the worker pool's OS threads and the registration barrier.
///
/// Dropping a `WorkerPool` does not join its threads; call
/// [`WorkerPool::shutdown`] explicitly.
pub struct WorkerPool {
    pub(crate) shared: Arc<PoolShared>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    #[must_use]
    pub fn builder() -> WorkerPoolBuilder {
        WorkerPoolBuilder::new()
    }

    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.shared.worker_count()
    }

    /// Drives worker 0 ("master") on the calling thread until `should_stop`
    /// is satisfied. Background threads run the equivalent loop
    /// automatically; the master only runs while this (or a
    /// [`crate::MicroScheduler`] wait operation) is on the stack.
    pub fn run_master(&self, should_stop: impl Fn() -> bool) {
        crate::worker::run_master(&self.shared, should_stop);
    }

    /// §4.4 `shutdown`: sets the stop flag, wakes every worker, and joins
    /// the background threads. Tasks submitted after this call are
    /// expected to be rejected by registered schedulers (`setActive` /
    /// `SpawnError::Closed`).
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.wake_all();
        let mut threads = self.threads.lock().unwrap();
        for handle in threads.drain(..) {
            let _ = handle.join();
        }
    }

    /// §4.4 `makePartition`: returns a sub-pool dispatching only to
    /// `indices`. Worker 0 can never appear in a partition.
    pub fn make_partition(&self, indices: &[usize]) -> Partition {
        assert!(!indices.contains(&0), "worker 0 cannot be partitioned out of its pool");
        assert!(
            indices.iter().all(|&i| i < self.worker_count()),
            "partition index out of range"
        );
        Partition {
            shared: Arc::clone(&self.shared),
            indices: indices.to_vec(),
        }
    }
}

impl WorkerHost for WorkerPool {
    fn shared(&self) -> &Arc<PoolShared> {
        &self.shared
    }

    fn worker_indices(&self) -> Vec<usize> {
        (0..self.worker_count()).collect()
    }
}

/// A restricted view over a subset of a [`WorkerPool`]'s workers (§3, §4.4).
/// The parent pool owns the OS threads; the partition only owns the right
/// to dispatch onto the listed indices.
pub struct Partition {
    shared: Arc<PoolShared>,
    indices: Vec<usize>,
}

impl WorkerHost for Partition {
    fn shared(&self) -> &Arc<PoolShared> {
        &self.shared
    }

    fn worker_indices(&self) -> Vec<usize> {
        self.indices.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_spawns_background_threads_for_non_master_workers() {
        let pool = WorkerPoolBuilder::new().workers(4).build();
        assert_eq!(pool.worker_count(), 4);
        assert_eq!(pool.threads.lock().unwrap().len(), 3);
        pool.shutdown();
    }

    #[test]
    fn partition_rejects_master_index() {
        let pool = WorkerPoolBuilder::new().workers(4).build();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            pool.make_partition(&[0, 1])
        }));
        assert!(result.is_err());
        pool.shutdown();
    }

    #[test]
    fn partition_accepts_valid_indices() {
        let pool = WorkerPoolBuilder::new().workers(4).build();
        let partition = pool.make_partition(&[1, 2]);
        assert_eq!(partition.worker_indices(), vec![1, 2]);
        pool.shutdown();
    }
}
