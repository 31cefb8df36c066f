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

//! Strategies that determine how a policy waits while a token is held
//! somewhere else.
//!
//! Every [`LockPolicy`] in this crate is generic over one of these strategies.
//! A fresh strategy instance is created for each contended wait, so stateful
//! strategies such as [`SpinBackoff`] restart their backoff on every
//! acquisition. The same strategy also paces the retry loop of
//! [`OrderedMultiLock`] between two failed all-or-nothing attempts.
//!
//! [`LockPolicy`]: crate::policy::LockPolicy
//! [`OrderedMultiLock`]: crate::policy::OrderedMultiLock

use crate::cfg::{hint, thread};

/// The strategy applied by policies that do not name one explicitly.
///
/// Yielding with backoff is the most forgiving choice for general purpose
/// code running under a preemptive OS scheduler.
pub type DefaultRelax = YieldBackoff;

/// A trait implemented by waiting strategies.
pub trait Relax {
    /// Initialize the state for the relaxing operation, if any.
    fn new() -> Self;

    /// Perform the relaxing operation during a period of contention.
    fn relax(&mut self);
}

/// A strategy that rapidly spins while informing the CPU that it should power
/// down non-essential components via [`core::hint::spin_loop`].
///
/// Spinning is a 'dumb' strategy: most schedulers cannot tell it apart from
/// useful work, so a preempted token holder may leave waiters burning their
/// whole time slices. This is known as [priority inversion]. Prefer [`Yield`]
/// or [`YieldBackoff`] unless critical sections are known to be tiny.
///
/// [priority inversion]: https://matklad.github.io/2020/01/02/spinlocks-considered-harmful.html
#[derive(Debug)]
pub struct Spin;

impl Relax for Spin {
    #[inline(always)]
    fn new() -> Self {
        Self
    }

    #[inline(always)]
    fn relax(&mut self) {
        hint::spin_loop();
    }
}

/// A strategy that yields the current time slice to the scheduler in favour of
/// other threads or processes.
#[derive(Debug)]
pub struct Yield;

impl Relax for Yield {
    #[inline(always)]
    fn new() -> Self {
        Self
    }

    #[inline]
    fn relax(&mut self) {
        thread::yield_now();
    }
}

/// A strategy that rapidly spins, without telling the CPU to do any powering down.
///
/// You almost certainly do not want to use this. Use [`Spin`] instead. It exists
/// for completeness and for targets that miscompile spin hint intrinsics.
#[derive(Debug)]
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
/// As with [`Spin`], this strategy is subject to priority inversion.
#[derive(Debug)]
pub struct SpinBackoff {
    step: Step,
}

impl SpinBackoff {
    const SPIN_LIMIT: u32 = 6;
}

impl Relax for SpinBackoff {
    #[inline(always)]
    fn new() -> Self {
        Self { step: Step(0) }
    }

    #[inline(always)]
    fn relax(&mut self) {
        self.step.spin_to(Self::SPIN_LIMIT);
        self.step.step_to(Self::SPIN_LIMIT);
    }
}

/// A strategy that, as [`Yield`], will yield back to the OS scheduler, but only
/// after performing exponential backoff in a spin loop within a threshold.
///
/// This is the [`DefaultRelax`] strategy.
#[derive(Debug)]
pub struct YieldBackoff {
    step: Step,
}

impl YieldBackoff {
    const SPIN_LIMIT: u32 = SpinBackoff::SPIN_LIMIT;
    const YIELD_LIMIT: u32 = 10;
}

impl Relax for YieldBackoff {
    #[inline(always)]
    fn new() -> Self {
        Self { step: Step(0) }
    }

    #[inline(always)]
    fn relax(&mut self) {
        if self.step.0 <= Self::SPIN_LIMIT {
            self.step.spin_to(Self::SPIN_LIMIT);
        } else {
            thread::yield_now();
        }
        self.step.step_to(Self::YIELD_LIMIT);
    }
}

/// Keeps count of the number of steps taken.
#[derive(Debug)]
struct Step(u32);

impl Step {
    /// Bounded backoff spinning.
    fn spin_to(&self, max: u32) {
        for _ in 0..1 << self.0.min(max) {
            hint::spin_loop();
        }
    }

    /// Bounded step increment.
    fn step_to(&mut self, end: u32) {
        if self.0 <= end {
            self.0 += 1;
        }
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use super::{Relax, SpinBackoff, YieldBackoff};

    #[test]
    fn spin_backoff_step_saturates() {
        let mut relax = SpinBackoff::new();
        for _ in 0..64 {
            relax.relax();
        }
        assert_eq!(relax.step.0, SpinBackoff::SPIN_LIMIT + 1);
    }

    #[test]
    fn yield_backoff_step_saturates() {
        let mut relax = YieldBackoff::new();
        for _ in 0..64 {
            relax.relax();
        }
        assert_eq!(relax.step.0, YieldBackoff::YIELD_LIMIT + 1);
    }
}
