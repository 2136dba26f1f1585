// Copyright 2026 microsched contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The one genuinely global piece of state in this crate: a process-wide
//! counter that hands out scheduler ids.
//!
//! Per the design notes, implementations should allow resetting this for
//! tests but must not rely on it for correctness — `MicroScheduler` equality
//! and routing never depend on id ordering, only on id uniqueness within a
//! process run.

use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

/// Opaque identifier for a [`crate::MicroScheduler`], unique for the lifetime
/// of the process (or since the last [`reset`]).
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct SchedulerId(u64);

pub(crate) fn next() -> SchedulerId {
    SchedulerId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
}

/// Resets the global scheduler-id counter to zero.
///
/// Intended for test harnesses that want deterministic ids across test runs
/// within the same process; never call this while any `MicroScheduler` from a
/// previous "epoch" is still alive, as ids would collide.
#[cfg(test)]
pub(crate) fn reset_for_test() {
    NEXT_ID.store(0, Ordering::Relaxed);
}
