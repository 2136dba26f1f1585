// Copyright 2026 microsched contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Configuring a task before it is made visible to any worker (§3 lifecycle:
//! "allocate → (optional configure: set parent/affinity/data) → spawn").

use super::{Priority, TaskFn, TaskRef};

/// Configures a task's priority and affinity before allocation.
///
/// This builder configures a payload before it becomes a [`TaskRef`] at
/// all — affinity and priority are fields on the allocated
/// [`super::Header`], not spawn-time arguments, so they must be set before
/// the task is published to any worker.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskBuilder {
    priority: Priority,
    affinity: Option<u32>,
}

impl TaskBuilder {
    /// Starts a new builder at normal priority with no affinity.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the priority band new tasks will be allocated into. Out-of-range
    /// bands are clamped by [`Priority::new`].
    #[must_use]
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Pins new tasks to the given worker index (§3 affinity field).
    #[must_use]
    pub fn affinity(mut self, worker: u32) -> Self {
        self.affinity = Some(worker);
        self
    }

    /// Allocates `body` with this builder's configuration. Returns `None` on
    /// allocation failure, matching [`TaskRef::allocate`].
    #[must_use]
    pub fn build<F: TaskFn>(self, body: F) -> Option<TaskRef> {
        let task = TaskRef::allocate(body, self.priority)?;
        if let Some(worker) = self.affinity {
            task.set_affinity(Some(worker));
        }
        Some(task)
    }
}
