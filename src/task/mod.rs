// Copyright 2026 microsched contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Task objects, the reference-count protocol, and the allocator (§4.1).
//!
//! A [`TaskRef`] is a type-erased, `Copy` handle to a heap-allocated
//! [`Header`] plus an inline, type-specific payload — the closure the user
//! spawned. Deliberately not a smart pointer: per the design notes, a
//! `Drop`-based wrapper would "obscure the protocol (in particular recycle
//! and bypass return values)", so `TaskRef` has no `Drop` impl at all.
//! Callers manipulate the reference count with [`TaskRef::add_ref`] and
//! [`TaskRef::remove_ref`], and are responsible for calling
//! [`TaskRef::destroy`] once the count reaches zero.

mod builder;
mod slab;

use std::alloc::Layout;
use std::cell::Cell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ptr::{self, NonNull};
use std::sync::{Arc, Condvar, Mutex};

use crate::loom::atomic::{fence, AtomicI32, AtomicU32, Ordering};

pub use builder::TaskBuilder;

mod state;
pub(crate) use state::State;

/// Number of priority bands a [`crate::MicroScheduler`] supports. Priority 0
/// is the normal band; higher indices are progressively lower priority (§3).
pub const MAX_PRIORITIES: usize = 8;

/// A task priority band, clamped to `0..MAX_PRIORITIES`.
///
/// Out-of-range priorities are clamped rather than rejected, matching §4.5's
/// `spawnTask` failure mode ("priority out of range → clamp").
#[derive(Debug, Clone, Copy, Eq, PartialEq, PartialOrd, Ord, Default)]
pub struct Priority(u8);

impl Priority {
    /// The normal-priority band.
    pub const NORMAL: Priority = Priority(0);

    /// Constructs a priority band, clamping `band` to the valid range.
    #[must_use]
    pub fn new(band: u8) -> Self {
        Priority(band.min(MAX_PRIORITIES as u8 - 1))
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Context handed to a task's body while it executes. Exposes the currently
/// running worker index and the owning scheduler, so a task can spawn
/// children onto the calling worker's deque.
pub struct Context<'a> {
    pub(crate) scheduler: &'a crate::scheduler::MicroScheduler,
    pub(crate) worker: usize,
    pub(crate) current: TaskRef,
}

impl<'a> Context<'a> {
    pub(crate) fn new(
        scheduler: &'a crate::scheduler::MicroScheduler,
        worker: usize,
        current: TaskRef,
    ) -> Self {
        Self {
            scheduler,
            worker,
            current,
        }
    }

    /// The scheduler this task is running under.
    #[must_use]
    pub fn scheduler(&self) -> &crate::scheduler::MicroScheduler {
        self.scheduler
    }

    /// The index (within the owning worker pool) of the worker currently
    /// executing this task.
    #[must_use]
    pub fn worker_index(&self) -> usize {
        self.worker
    }

    /// The task currently executing on this context.
    #[must_use]
    pub fn current_task(&self) -> TaskRef {
        self.current
    }

    /// Allocates `body` as a child of the currently executing task and spawns
    /// it onto this worker's deque (§4.1 `addChild`, §4.5 `spawnTask`).
    pub fn spawn_child<F: TaskFn>(
        &self,
        body: F,
        priority: Priority,
    ) -> Result<TaskRef, crate::error::SpawnError> {
        self.scheduler.spawn_child(self, body, priority)
    }

    /// Adopts an already-allocated, parentless task as a child of the
    /// currently executing task, publishing it onto this worker's deque (or,
    /// if the task carries affinity, onto the target worker's affinity
    /// queue). Use this instead of [`Self::spawn_child`] when the task tree
    /// is built recursively by a free function rather than from an inline
    /// closure (e.g. a fork/join fan-out where each node needs to reference
    /// its own children's output slots before they exist as closures).
    pub fn adopt_child(&self, child: TaskRef) {
        self.scheduler.adopt_child(self, child);
    }

    /// Like [`Self::spawn_child`], but `builder` configures the child's
    /// priority and affinity up front (§3 affinity field) instead of only
    /// priority. A child with affinity `i` is routed directly to worker `i`'s
    /// affinity queue rather than the calling worker's own deque.
    pub fn spawn_child_with<F: TaskFn>(
        &self,
        builder: TaskBuilder,
        body: F,
    ) -> Result<TaskRef, crate::error::SpawnError> {
        self.scheduler.spawn_child_with(self, builder, body)
    }

    /// Runs `f` with this worker's local scheduler isolated under a fresh
    /// tag for the duration of the call (§4.5 `isolate`).
    pub fn isolate<R>(&self, f: impl FnOnce(&Context<'_>) -> R) -> R {
        self.scheduler.isolate(self, f)
    }

    /// Requests that the currently executing task be re-run from the start
    /// of `execute` instead of being retired once this call returns (§4.1
    /// `RECYCLE`): the task keeps its identity, children, and ref count, only
    /// the body runs again. Useful for a task that cooperatively yields
    /// control back to the executor loop partway through a larger unit of
    /// work (e.g. to let other tasks interleave) without losing its place.
    pub fn recycle(&self) {
        self.current.insert_state(State::RECYCLE);
    }
}

/// The user-supplied task body. Implemented for any `FnMut` so tasks can be
/// spawned from closures; a hand-rolled `struct Foo; impl TaskFn for Foo`
/// works too, for callers that want a named type with virtual-dispatch-style
/// `execute` rather than a closure. Recycling (§4.1) requires calling this
/// more than once, hence `FnMut` rather than `FnOnce`.
pub trait TaskFn: Send + 'static {
    /// Runs one step of the task. Returning `Some(next)` bypasses the deque:
    /// `next` becomes the very next task the calling worker executes.
    fn execute(&mut self, cx: &Context<'_>) -> Option<TaskRef>;
}

impl<F> TaskFn for F
where
    F: FnMut(&Context<'_>) -> Option<TaskRef> + Send + 'static,
{
    fn execute(&mut self, cx: &Context<'_>) -> Option<TaskRef> {
        (self)(cx)
    }
}

struct Vtable {
    execute: unsafe fn(NonNull<Header>, &Context<'_>) -> Option<TaskRef>,
    destroy: unsafe fn(NonNull<Header>),
    layout: Layout,
    /// Set only for the `WAITING_DUMMY` sentinel; wakes a parked external
    /// waiter. `None` for ordinary tasks.
    notify_waiter: Option<unsafe fn(NonNull<Header>)>,
}

/// The shared task header: reference count, state flags, and the links that
/// make up the task graph (§3). Never constructed or read directly by user
/// code — always accessed through [`TaskRef`].
///
/// `parent`, `continuation`, `affinity`, `isolation_tag`, and `priority` are
/// plain `Cell`s rather than atomics: each is written exactly once, strictly
/// before the task is published by a push into a deque or queue, and never
/// mutated again except by the single worker currently executing the task
/// (which, per the data model invariant, is the only thread touching the
/// task at that point). The push/pop pair that publishes and later retrieves
/// the task already carries the release/acquire fence those fields ride on,
/// so no additional synchronization is needed for them specifically. The
/// reference count and state flags genuinely are touched concurrently and
/// use real atomics below.
pub(crate) struct Header {
    ref_count: AtomicI32,
    state: AtomicU32,
    parent: Cell<Option<TaskRef>>,
    continuation: Cell<Option<TaskRef>>,
    affinity: Cell<Option<u32>>,
    isolation_tag: Cell<usize>,
    priority: Cell<Priority>,
    vtable: &'static Vtable,
}

// Safety: see the doc comment on `Header` above — every field besides the two
// atomics is single-writer-before-publish, single-reader-after-acquire.
unsafe impl Sync for Header {}

impl Header {
    fn new(vtable: &'static Vtable, priority: Priority) -> Self {
        #[cfg(feature = "counters")]
        LIVE_TASKS.fetch_add(1, Ordering::Relaxed);
        Self {
            ref_count: AtomicI32::new(1),
            state: AtomicU32::new(State::ALLOCATED.bits()),
            parent: Cell::new(None),
            continuation: Cell::new(None),
            affinity: Cell::new(None),
            isolation_tag: Cell::new(0),
            priority: Cell::new(priority),
            vtable,
        }
    }
}

/// Live-allocation counter, gated behind the `counters` feature so the hot
/// path pays nothing for it by default (§12, added: test tooling needs a way
/// to observe "zero live tasks" for the conservation invariant without
/// instrumenting every call site by hand).
#[cfg(feature = "counters")]
static LIVE_TASKS: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);

/// Number of allocated tasks (of any kind, including `WAITING_DUMMY`
/// sentinels) that have not yet been destroyed. Only meaningful with the
/// `counters` feature enabled; always reports 0 otherwise.
#[cfg(feature = "counters")]
#[must_use]
pub fn live_task_count() -> usize {
    LIVE_TASKS.load(Ordering::Relaxed)
}

#[repr(C)]
struct Task<F> {
    /// Must stay the first field: `TaskRef` casts between `NonNull<Header>`
    /// and `NonNull<Task<F>>` on the assumption that they share an address.
    header: Header,
    payload: std::cell::UnsafeCell<F>,
}

impl<F: TaskFn> Task<F> {
    const VTABLE: Vtable = Vtable {
        execute: Self::execute_erased,
        destroy: Self::destroy_erased,
        layout: Layout::new::<Task<F>>(),
        notify_waiter: None,
    };

    unsafe fn execute_erased(header: NonNull<Header>, cx: &Context<'_>) -> Option<TaskRef> {
        let this = header.cast::<Task<F>>();
        // Safety: at most one worker executes a task at a time (data model
        // invariant), so this is the sole live reference to the payload.
        let payload = unsafe { &mut *this.as_ref().payload.get() };
        payload.execute(cx)
    }

    unsafe fn destroy_erased(header: NonNull<Header>) {
        let this = header.cast::<Task<F>>();
        // Safety: caller (`TaskRef::destroy`) guarantees the ref count has
        // reached zero, so no other handle can observe this task again.
        unsafe {
            ptr::drop_in_place(this.as_ptr());
        }
        // Safety: `this` was allocated with exactly `Self::VTABLE.layout` by
        // `allocate` below.
        unsafe { slab::free(this.cast::<u8>(), Self::VTABLE.layout) };
    }

    fn allocate(payload: F, priority: Priority) -> Option<TaskRef> {
        let layout = Self::VTABLE.layout;
        // Safety: layout is non-zero-sized (`Header` alone guarantees that).
        let raw = unsafe { slab::allocate(layout) }?;
        let typed: NonNull<Task<F>> = raw.cast();
        // Safety: `raw` is freshly allocated, uninitialized, and exactly
        // `layout`-sized/aligned for `Task<F>`.
        unsafe {
            ptr::write(
                typed.as_ptr(),
                Task {
                    header: Header::new(&Self::VTABLE, priority),
                    payload: std::cell::UnsafeCell::new(payload),
                },
            );
        }
        Some(TaskRef(typed.cast()))
    }
}

/// A type-erased, reference-counted handle to an allocated task.
///
/// `TaskRef` is `Copy`, like a raw pointer, and carries no ownership: see the
/// module docs for why it intentionally has no `Drop` impl.
#[derive(Clone, Copy)]
pub struct TaskRef(NonNull<Header>);

// Safety: `Header`'s fields follow the single-writer-before-publish
// discipline documented on `Header`; the atomics are genuinely thread-safe.
// A `TaskRef` is a pointer to that header and nothing else.
unsafe impl Send for TaskRef {}
unsafe impl Sync for TaskRef {}

static_assertions::assert_impl_all!(TaskRef: Send, Sync);

impl fmt::Debug for TaskRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskRef({:p})", self.0.as_ptr())
    }
}

impl Eq for TaskRef {}
impl PartialEq for TaskRef {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl Hash for TaskRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl TaskRef {
    /// Allocates a new task from a closure (or other [`TaskFn`]
    /// implementation), with reference count 1 and no flags beyond
    /// `ALLOCATED`. Returns `None` on allocation failure.
    pub fn allocate<F: TaskFn>(body: F, priority: Priority) -> Option<TaskRef> {
        Task::allocate(body, priority)
    }

    fn header(&self) -> &Header {
        // Safety: a `TaskRef` is only ever constructed from a live,
        // correctly-aligned `Header` pointer (see `allocate` and
        // `new_wait_dummy`), and is never outlived by the allocation it
        // points to while any ref-counted handle to it survives.
        unsafe { self.0.as_ref() }
    }

    /// Adds `n` to the reference count (relaxed: synchronization happens on
    /// the decrement side, per §4.1).
    pub(crate) fn add_ref(&self, n: i32) {
        self.header().ref_count.fetch_add(n, Ordering::Relaxed);
    }

    /// Subtracts `n` from the reference count and returns the count that
    /// results. A result of zero means the caller must call [`Self::destroy`]
    /// (unless `RECYCLE` is set); the executor's completion protocol also
    /// treats a parent reaching exactly one specially (§4.3: no more
    /// outstanding children, only the parent's own placeholder reference
    /// remains).
    pub(crate) fn remove_ref(&self, n: i32) -> i32 {
        let prev = self.header().ref_count.fetch_sub(n, Ordering::Release);
        debug_assert!(prev >= n, "task ref count underflow");
        let result = prev - n;
        if result == 0 {
            fence(Ordering::Acquire);
        }
        result
    }

    pub(crate) fn ref_count(&self) -> i32 {
        self.header().ref_count.load(Ordering::Relaxed)
    }

    /// Forces the reference count to zero directly, releasing a
    /// `WAITING_DUMMY` sentinel without going through the normal decrement
    /// protocol (§4.3 completion handling: "set parent.refCount to 0").
    pub(crate) fn force_zero(&self) {
        self.header().ref_count.store(0, Ordering::Release);
    }

    pub(crate) fn state(&self) -> State {
        State::from_bits_truncate(self.header().state.load(Ordering::Acquire))
    }

    /// Publishes flags with release ordering: used right before a task
    /// becomes visible to other workers (spawn/queue).
    pub(crate) fn insert_state(&self, flags: State) {
        self.header()
            .state
            .fetch_or(flags.bits(), Ordering::Release);
    }

    pub(crate) fn remove_state(&self, flags: State) -> State {
        let prev = self
            .header()
            .state
            .fetch_and(!flags.bits(), Ordering::AcqRel);
        State::from_bits_truncate(prev)
    }

    pub(crate) fn parent(&self) -> Option<TaskRef> {
        self.header().parent.get()
    }

    pub(crate) fn set_parent(&self, parent: Option<TaskRef>) {
        self.header().parent.set(parent);
    }

    pub(crate) fn continuation(&self) -> Option<TaskRef> {
        self.header().continuation.get()
    }

    /// Sets `cont` as this task's continuation and marks `cont` with the
    /// `CONTINUATION` flag. `cont == self` is a protocol violation — cyclic
    /// task graphs are unsupported.
    ///
    /// Per the glossary, a continuation "runs after all children of its
    /// predecessor complete, re-using the predecessor's parent link": `cont`
    /// inherits `self`'s parent pointer (and the ref-count obligation that
    /// link represents), and `self`'s own parent pointer is redirected to
    /// `cont`. `self` completing then decrements `cont` instead of notifying
    /// the original parent directly; once `cont` itself later completes, it
    /// notifies that original parent in `self`'s place. This lets the
    /// ordinary completion cascade in [`crate::executor::run_task`] drive
    /// continuations with no separate code path.
    pub fn set_continuation(&self, cont: TaskRef) {
        debug_assert!(cont != *self, "a task cannot be its own continuation");
        cont.insert_state(State::CONTINUATION);
        cont.set_parent(self.parent());
        cont.add_ref(1);
        self.set_parent(Some(cont));
        self.header().continuation.set(Some(cont));
    }

    pub(crate) fn affinity(&self) -> Option<u32> {
        self.header().affinity.get()
    }

    pub(crate) fn set_affinity(&self, worker: Option<u32>) {
        self.header().affinity.set(worker);
    }

    pub(crate) fn isolation_tag(&self) -> usize {
        self.header().isolation_tag.get()
    }

    pub(crate) fn set_isolation_tag(&self, tag: usize) {
        self.header().isolation_tag.set(tag);
    }

    pub(crate) fn priority(&self) -> Priority {
        self.header().priority.get()
    }

    /// Adds `child` as a new child of `self`: requires `child` have no
    /// parent yet and a fresh ref count of 1 (§4.1 `addChild`). Adds one
    /// reference to `self` to account for the child.
    pub(crate) fn add_child(&self, child: TaskRef) {
        debug_assert!(child.parent().is_none());
        debug_assert_eq!(child.ref_count(), 1);
        child.set_parent(Some(*self));
        self.add_ref(1);
    }

    /// Same as [`Self::add_child`] but does not touch `self`'s ref count;
    /// used when the caller has already added references for a batch of
    /// children up front (§4.1 `addChildWithoutRef`).
    pub(crate) fn add_child_without_ref(&self, child: TaskRef) {
        child.set_parent(Some(*self));
    }

    /// Runs one step of the task body. Caller must ensure at most one
    /// worker executes this task at a time and that the task is not
    /// `WAITING_DUMMY`.
    pub(crate) fn execute(&self, cx: &Context<'_>) -> Option<TaskRef> {
        debug_assert!(
            !self.state().contains(State::WAITING_DUMMY),
            "a WAITING_DUMMY sentinel must never be executed"
        );
        // Safety: `self.0` is a valid `Header` for the lifetime of this
        // call per the single-executor invariant.
        unsafe { (self.header().vtable.execute)(self.0, cx) }
    }

    /// Runs the task's destructor and returns its memory to the per-worker
    /// slab. Caller must ensure the reference count has already reached
    /// zero and that no other handle to this task survives the call.
    pub(crate) fn destroy(&self) {
        #[cfg(feature = "counters")]
        LIVE_TASKS.fetch_sub(1, Ordering::Relaxed);
        // Safety: caller contract above.
        unsafe { (self.header().vtable.destroy)(self.0) }
    }

    /// Wakes whatever is parked on this `WAITING_DUMMY` sentinel. No-op for
    /// ordinary tasks.
    pub(crate) fn notify_waiter(&self) {
        if let Some(notify) = self.header().vtable.notify_waiter {
            // Safety: `notify` is only set on the dummy's vtable, which
            // always points to a live `Task<WaitDummy>`.
            unsafe { notify(self.0) };
        }
    }
}

/// Shared completion signal between a `WAITING_DUMMY` sentinel and the
/// non-worker thread parked on it (§4.5 `waitFor`, Open Question (c)).
pub(crate) struct WaitSignal {
    done: Mutex<bool>,
    condvar: Condvar,
}

impl WaitSignal {
    fn new() -> Self {
        Self {
            done: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    fn wait(&self) {
        let mut done = self.done.lock().unwrap();
        while !*done {
            done = self.condvar.wait(done).unwrap();
        }
    }

    fn signal(&self) {
        *self.done.lock().unwrap() = true;
        self.condvar.notify_all();
    }
}

struct WaitDummy {
    signal: Arc<WaitSignal>,
}

impl WaitDummy {
    const VTABLE: Vtable = Vtable {
        execute: Self::execute_erased,
        destroy: Self::destroy_erased,
        layout: Layout::new::<Task<WaitDummy>>(),
        notify_waiter: Some(Self::notify_erased),
    };

    unsafe fn execute_erased(_header: NonNull<Header>, _cx: &Context<'_>) -> Option<TaskRef> {
        unreachable!("WAITING_DUMMY tasks are never executed");
    }

    unsafe fn destroy_erased(header: NonNull<Header>) {
        let this = header.cast::<Task<WaitDummy>>();
        // Safety: same contract as `Task::<F>::destroy_erased`.
        unsafe {
            ptr::drop_in_place(this.as_ptr());
        }
        unsafe { slab::free(this.cast::<u8>(), Self::VTABLE.layout) };
    }

    unsafe fn notify_erased(header: NonNull<Header>) {
        let this = header.cast::<Task<WaitDummy>>();
        // Safety: `this` outlives the call, see `Header`'s contract.
        let dummy = unsafe { &*this.as_ref().payload.get() };
        dummy.signal.signal();
    }
}

/// Allocates a fresh `WAITING_DUMMY` sentinel and returns it along with the
/// signal a non-worker thread should wait on until the sentinel is notified.
pub(crate) fn new_wait_dummy() -> (TaskRef, Arc<WaitSignal>) {
    let signal = Arc::new(WaitSignal::new());
    let layout = WaitDummy::VTABLE.layout;
    // Safety: layout is non-zero-sized.
    let raw = unsafe { slab::allocate(layout) }.expect("wait dummy allocation failed");
    let typed: NonNull<Task<WaitDummy>> = raw.cast();
    // Safety: freshly allocated, uninitialized, correctly sized/aligned.
    unsafe {
        ptr::write(
            typed.as_ptr(),
            Task {
                header: Header::new(&WaitDummy::VTABLE, Priority::NORMAL),
                payload: std::cell::UnsafeCell::new(WaitDummy {
                    signal: Arc::clone(&signal),
                }),
            },
        );
    }
    let task_ref = TaskRef(typed.cast());
    task_ref.insert_state(State::WAITING_DUMMY);
    (task_ref, signal)
}

pub(crate) fn wait_on_signal(signal: &WaitSignal) {
    signal.wait();
}
