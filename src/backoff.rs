// Copyright 2026 microsched contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Per-worker idle backoff: spin, then yield the OS thread, then signal that
//! the caller should park.
//!
//! The numeric thresholds are deliberately not constants: per the design
//! notes, "the precise numeric defaults for backoff thresholds differ across
//! the source's history and should be treated as tunable, not contractual".
//! [`BackoffConfig`] is threaded through from [`crate::SchedulerConfig`] so a
//! host can retune this without forking the crate.

use crossbeam_utils::Backoff as SpinBackoff;

/// Tunable thresholds for the idle backoff. See the module docs for why these
/// are not hardcoded constants.
#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    /// Number of consecutive failed work-search passes after which the worker
    /// starts yielding the OS thread instead of pure-spinning.
    pub yield_after: u32,
    /// Number of consecutive failed passes after which the worker requests to
    /// park. Must be `>= yield_after`.
    pub park_after: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            yield_after: 32,
            park_after: 256,
        }
    }
}

/// What a worker should do after a failed pass over the task-selection chain.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) enum BackoffAction {
    /// Kept spinning; try the task-selection chain again immediately.
    Spin,
    /// Yielded the OS thread; try again.
    Yield,
    /// Exceeded the park threshold; the caller should check global
    /// quiescence and, if still idle, park.
    ParkReady,
}

#[derive(Debug)]
pub(crate) struct Backoff {
    config: BackoffConfig,
    spins: u32,
    inner: SpinBackoff,
}

impl Backoff {
    pub(crate) fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            spins: 0,
            inner: SpinBackoff::new(),
        }
    }

    /// Record one failed attempt at finding work and back off accordingly.
    /// A worker that successfully finds work must call [`Self::reset`]
    /// instead of this.
    pub(crate) fn tick(&mut self) -> BackoffAction {
        self.spins = self.spins.saturating_add(1);

        if self.spins >= self.config.park_after {
            return BackoffAction::ParkReady;
        }

        if self.spins >= self.config.yield_after {
            self.inner.snooze();
            return BackoffAction::Yield;
        }

        self.inner.spin();
        BackoffAction::Spin
    }

    pub(crate) fn reset(&mut self) {
        self.spins = 0;
        self.inner.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::{Backoff, BackoffAction, BackoffConfig};

    #[test]
    fn escalates_through_stages() {
        let config = BackoffConfig {
            yield_after: 2,
            park_after: 4,
        };
        let mut backoff = Backoff::new(config);
        assert_eq!(backoff.tick(), BackoffAction::Spin);
        assert_eq!(backoff.tick(), BackoffAction::Yield);
        assert_eq!(backoff.tick(), BackoffAction::Yield);
        assert_eq!(backoff.tick(), BackoffAction::ParkReady);
    }

    #[test]
    fn reset_returns_to_spin() {
        let mut backoff = Backoff::new(BackoffConfig::default());
        for _ in 0..10 {
            backoff.tick();
        }
        backoff.reset();
        assert_eq!(backoff.tick(), BackoffAction::Spin);
    }
}
