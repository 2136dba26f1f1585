// Copyright 2026 microsched contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Swaps the atomics behind [`crate::task::Header`]'s reference count and
//! state bitfield for loom's instrumented equivalents under `cfg(loom)`, so
//! `cargo test --profile loom --cfg loom` can exhaustively check every
//! thread interleaving of the ref-count protocol (§4.1) instead of relying
//! on a handful of real-thread runs to happen to hit the interesting races.
//!
//! We narrow the swap to just the ref-count/state atomics in
//! [`crate::task::Header`] rather than the whole crate: loom's model checker
//! explores every interleaving of every instrumented operation, and the
//! worker pool spawns real OS threads (`std::thread`), which loom cannot
//! model at all. Model-checking the handful of atomic operations that make
//! up the reference-count protocol in isolation — the one genuinely subtle
//! lock-free contract in this crate — is tractable; model-checking the
//! entire pool is not.

use cfg_if::cfg_if;

cfg_if! {
    if #[cfg(loom)] {
        pub(crate) use loom::sync::atomic;
        #[cfg(test)]
        pub(crate) use loom::{model, thread};
    } else {
        pub(crate) use std::sync::atomic;

        #[cfg(test)]
        pub(crate) use std::thread;

        #[cfg(test)]
        pub(crate) fn model(f: impl Fn() + Send + Sync + 'static) {
            f();
        }
    }
}
