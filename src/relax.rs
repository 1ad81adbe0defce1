// Modified version of relax.rs from spin-rs to support Loom yielding and
// exponential backoff.
//
// Original file at its most recent change (at the time of writing):
// https://github.com/mvdnes/spin-rs/blob/5860ee114094cf200b97348ff332155fbd7159b4/src/relax.rs
//
// Copyright (c) 2014 Mathijs van de Nes
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Strategies that determine how a waiter burns time before it is parked.
//!
//! A queued waiter whose predecessor is the head of the queue is the next in
//! line for the state, so it may retry its acquisition a few times before
//! going to sleep. Between two attempts it runs one of these relax
//! operations, as selected by its [`Park`] policy.
//!
//! [`Park`]: crate::park::Park

/// A trait implemented by spinning relax strategies.
pub trait Relax {
    /// Initialize the state for the relaxing operation, if any.
    fn new() -> Self;

    /// Perform the relaxing operation during a period of contention.
    fn relax(&mut self);
}

/// A strategy that rapidly spins while informing the CPU that it should power
/// down non-essential components via [`core::hint::spin_loop`].
///
/// Spinning is only worthwhile for very short waits, since most schedulers
/// can not tell it apart from useful work. Parking policies bound the number
/// of spins before the thread is put to sleep.
pub struct Spin;

impl Relax for Spin {
    #[inline(always)]
    fn new() -> Self {
        Self
    }

    #[inline(always)]
    fn relax(&mut self) {
        crate::cfg::hint::spin_loop();
    }
}

/// A strategy that yields the current time slice to the scheduler in favour of
/// other threads or processes.
pub struct Yield;

impl Relax for Yield {
    #[inline(always)]
    fn new() -> Self {
        Self
    }

    /// When running Loom models, this calls Loom's `yield_now` to tell Loom
    /// that another thread needs to be scheduled in order for the current one
    /// to make progress.
    #[inline]
    fn relax(&mut self) {
        crate::cfg::thread::yield_now();
    }
}

/// A strategy that rapidly spins, without telling the CPU to do any powering down.
///
/// You almost certainly do not want to use this. Use [`Spin`] instead. It exists
/// for completeness and for targets that, for some reason, miscompile or do not
/// support spin hint intrinsics despite attempting to generate code for them
/// (i.e: this is a workaround for possible compiler bugs).
pub struct Loop;

impl Relax for Loop {
    #[inline(always)]
    fn new() -> Self {
        Self
    }

    #[inline(always)]
    fn relax(&mut self) {}
}

// Exponential backoff is based on the crossbeam-utils implementation.
// link to most recent change (as the time of writing):
// https://github.com/crossbeam-rs/crossbeam/blob/371de8c2d304db07662450995848f3dc9598ac99/crossbeam-utils/src/backoff.rs
//
// Copyright (c) 2019 The Crossbeam Project Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

/// A strategy that, as [`Spin`], will run a busy-wait spin-loop, except this
/// implementation will perform exponential backoff.
///
/// Backing off reduces the traffic on the state word while the current holder
/// is about to release it.
pub struct SpinBackoff {
    step: u32,
}

impl SpinBackoff {
    const SPIN_LIMIT: u32 = 6;
}

impl Relax for SpinBackoff {
    #[inline(always)]
    fn new() -> Self {
        Self { step: 0 }
    }

    #[inline(always)]
    fn relax(&mut self) {
        for _ in 0..1 << self.step.min(Self::SPIN_LIMIT) {
            crate::cfg::hint::spin_loop();
        }
        if self.step <= Self::SPIN_LIMIT {
            self.step += 1;
        }
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use super::{Relax, SpinBackoff};

    #[test]
    fn spin_backoff_step_is_bounded() {
        let mut backoff = SpinBackoff::new();
        for _ in 0..100 {
            backoff.relax();
        }
        assert_eq!(backoff.step, SpinBackoff::SPIN_LIMIT + 1);
    }
}
