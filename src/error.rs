// Copyright 2026 microsched contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::fmt;

/// Error returned by [`crate::MicroScheduler::spawn`]/[`crate::MicroScheduler::queue`].
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SpawnError {
    /// The target scheduler has been [set inactive](crate::MicroScheduler::set_active)
    /// or its worker pool has shut down.
    Closed,
    /// The task allocator could not satisfy the allocation.
    Alloc,
}

impl fmt::Display for SpawnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpawnError::Closed => f.write_str("scheduler is closed"),
            SpawnError::Alloc => f.write_str("task allocation failed"),
        }
    }
}

impl std::error::Error for SpawnError {}

/// Returned by [`crate::MicroScheduler::add_external_victim`] when the requested
/// edge would create a cycle in the external-victim graph. Cycles are detected
/// eagerly and refused rather than left to manifest as an infinite steal chain
/// at runtime. See DESIGN.md.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct IsolationCycle;

impl fmt::Display for IsolationCycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("adding this external victim would create a cycle")
    }
}

impl std::error::Error for IsolationCycle {}
