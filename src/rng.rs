// Copyright 2026 microsched contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Per-worker random number generator used to pick a steal victim.
//!
//! Backed by `fastrand`, the same crate the teacher's own work-stealing
//! executor reaches for to pick a steal starting point
//! (`libs/kasync/src/executor.rs`'s `self.rng.fastrand_n(...)`). There is no
//! global RNG; every worker owns one, seeded from its own index so victim
//! choice is deterministic given a worker count and steal sequence, which
//! makes scheduling bugs reproducible under test.

pub(crate) type Rng = fastrand::Rng;

/// Seeds a worker's RNG from its index. `fastrand`'s wyrand core has no
/// all-zero-state restriction, but the `+1` offset is kept anyway so no two
/// callers of this function ever collide with a literal zero seed.
pub(crate) fn for_worker(index: usize) -> Rng {
    Rng::with_seed(index as u64 + 1)
}
