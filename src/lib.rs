//! Scoped, closure-based access to shared data under a pluggable locking
//! policy.
//!
//! The core type of this crate is [`GuardedValue`], which owns one value and
//! one [`LockPolicy`]. The value is only reachable inside a closure given to
//! [`with_read`] or [`with_write`], which acquire the policy before running the
//! closure and release it on every exit path: normal return, early return of
//! an error, or unwinding. No reference to the value can escape the closure,
//! which is checked at compile time.
//!
//! ```
//! use std::sync::Arc;
//! use std::thread;
//!
//! use guardlock::GuardedValue;
//!
//! let value = Arc::new(GuardedValue::<_>::new(0));
//! let handles: Vec<_> = (0..2)
//!     .map(|_| {
//!         let value = Arc::clone(&value);
//!         thread::spawn(move || (0..10_000).for_each(|_| value.with_write(|n| *n += 1)))
//!     })
//!     .collect();
//! for handle in handles {
//!     handle.join().unwrap();
//! }
//! assert_eq!(value.with_read(|n| *n), 20_000);
//! ```
//!
//! ## Policies
//!
//! The [`policy`] module provides three policies:
//!
//! - [`Exclusive`]: reads and writes are both mutually exclusive. This is the
//!   default policy.
//! - [`SharedReadExclusiveWrite`]: any number of concurrent readers, or one
//!   writer. There is no writer preference, so readers may starve writers.
//! - [`OrderedMultiLock`]: several exclusive tokens acquired as one
//!   all-or-nothing step.
//!
//! Acquiring the same value twice from one thread, in a way that could never
//! complete, is a programming error. Policies detect it and panic with a
//! [`ContractViolation`] instead of deadlocking.
//!
//! ## Building blocks
//!
//! On top of [`GuardedValue`] the crate provides:
//!
//! - [`SafeContainer`]: a stack, or queue, with atomic check-and-act removal
//!   through [`try_pop`] and [`pop`].
//! - [`SafeCounter`]: a counter whose increments are never lost.
//! - [`SafeSink`]: serialized line output tagged with the [`ContextId`] of the
//!   writing thread.
//! - [`multi`]: combined acquisition of two or three values, free of the lock
//!   ordering deadlock.
//!
//! ## Diagnostics
//!
//! The crate emits [`tracing`] events and never installs a subscriber. Contract
//! violations and sink failures are reported at the `ERROR` level, sink
//! lifecycle at `DEBUG` and multi-lock backoff retries at `TRACE`.
//!
//! ## Features
//!
//! This crate does not provide any default features. Features that can be enabled
//! are:
//!
//! ### lock_api
//!
//! This feature implements the [`RawMutex`] trait from the [lock_api] crate for
//! [`Exclusive`], and the [`RawRwLock`] trait for [`SharedReadExclusiveWrite`].
//! Aliases are provided by the [`lock_api`] module.
//!
//! [`with_read`]: GuardedValue::with_read
//! [`with_write`]: GuardedValue::with_write
//! [`try_pop`]: SafeContainer::try_pop
//! [`pop`]: SafeContainer::pop
//! [`LockPolicy`]: policy::LockPolicy
//! [`Exclusive`]: policy::Exclusive
//! [`SharedReadExclusiveWrite`]: policy::SharedReadExclusiveWrite
//! [`OrderedMultiLock`]: policy::OrderedMultiLock
//! [`tracing`]: https://docs.rs/tracing/latest/tracing
//! [lock_api]: https://docs.rs/lock_api/latest/lock_api
//! [`RawMutex`]: https://docs.rs/lock_api/latest/lock_api/trait.RawMutex.html
//! [`RawRwLock`]: https://docs.rs/lock_api/latest/lock_api/trait.RawRwLock.html

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod cfg;
mod container;
mod context;
mod counter;
mod error;
mod guarded;
mod sink;

pub mod multi;
pub mod policy;
pub mod relax;

pub use container::{Discipline, SafeContainer};
pub use context::ContextId;
pub use counter::SafeCounter;
pub use error::{ContractViolation, Error, Result};
pub use guarded::GuardedValue;
pub use sink::SafeSink;

#[cfg(all(feature = "lock_api", not(loom)))]
#[cfg_attr(docsrs, doc(cfg(feature = "lock_api")))]
pub mod lock_api;

/// Policy and value aliases that signal the processor that it is running a
/// busy-wait spin-loop during contention.
pub mod spins {
    use crate::relax::Spin;

    /// An [`Exclusive`](crate::policy::Exclusive) policy that implements the
    /// [`Spin`] relax strategy.
    pub type Exclusive = crate::policy::Exclusive<Spin>;

    /// A [`SharedReadExclusiveWrite`](crate::policy::SharedReadExclusiveWrite)
    /// policy that implements the [`Spin`] relax strategy.
    pub type SharedReadExclusiveWrite = crate::policy::SharedReadExclusiveWrite<Spin>;

    /// An [`OrderedMultiLock`](crate::policy::OrderedMultiLock) policy of two
    /// tokens that implements the [`Spin`] relax strategy.
    pub type OrderedMultiLock = crate::policy::OrderedMultiLock<Spin>;

    /// A guarded value under an [`Exclusive`] policy.
    ///
    /// # Example
    ///
    /// ```
    /// use guardlock::spins::GuardedValue;
    ///
    /// let value = GuardedValue::new(0);
    /// let data = value.with_read(|data| *data);
    /// assert_eq!(data, 0);
    /// ```
    pub type GuardedValue<T> = crate::GuardedValue<T, Exclusive>;

    /// A container under an [`Exclusive`] policy.
    pub type SafeContainer<T> = crate::SafeContainer<T, Exclusive>;

    /// Policy and value aliases that, during contention, will perform
    /// exponential backoff while signaling the processor that it is running a
    /// busy-wait spin-loop.
    pub mod backoff {
        use crate::relax::SpinBackoff;

        /// An [`Exclusive`](crate::policy::Exclusive) policy that implements
        /// the [`SpinBackoff`] relax strategy.
        pub type Exclusive = crate::policy::Exclusive<SpinBackoff>;

        /// A [`SharedReadExclusiveWrite`](crate::policy::SharedReadExclusiveWrite)
        /// policy that implements the [`SpinBackoff`] relax strategy.
        pub type SharedReadExclusiveWrite = crate::policy::SharedReadExclusiveWrite<SpinBackoff>;

        /// An [`OrderedMultiLock`](crate::policy::OrderedMultiLock) policy of
        /// two tokens that implements the [`SpinBackoff`] relax strategy.
        pub type OrderedMultiLock = crate::policy::OrderedMultiLock<SpinBackoff>;

        /// A guarded value under an [`Exclusive`] policy.
        ///
        /// # Example
        ///
        /// ```
        /// use guardlock::spins::backoff::GuardedValue;
        ///
        /// let value = GuardedValue::new(0);
        /// let data = value.with_read(|data| *data);
        /// assert_eq!(data, 0);
        /// ```
        pub type GuardedValue<T> = crate::GuardedValue<T, Exclusive>;

        /// A container under an [`Exclusive`] policy.
        pub type SafeContainer<T> = crate::SafeContainer<T, Exclusive>;
    }
}

/// Policy and value aliases that yield the current time slice to the OS
/// scheduler during contention.
pub mod yields {
    use crate::relax::Yield;

    /// An [`Exclusive`](crate::policy::Exclusive) policy that implements the
    /// [`Yield`] relax strategy.
    pub type Exclusive = crate::policy::Exclusive<Yield>;

    /// A [`SharedReadExclusiveWrite`](crate::policy::SharedReadExclusiveWrite)
    /// policy that implements the [`Yield`] relax strategy.
    pub type SharedReadExclusiveWrite = crate::policy::SharedReadExclusiveWrite<Yield>;

    /// An [`OrderedMultiLock`](crate::policy::OrderedMultiLock) policy of two
    /// tokens that implements the [`Yield`] relax strategy.
    pub type OrderedMultiLock = crate::policy::OrderedMultiLock<Yield>;

    /// A guarded value under an [`Exclusive`] policy.
    ///
    /// # Example
    ///
    /// ```
    /// use guardlock::yields::GuardedValue;
    ///
    /// let value = GuardedValue::new(0);
    /// let data = value.with_read(|data| *data);
    /// assert_eq!(data, 0);
    /// ```
    pub type GuardedValue<T> = crate::GuardedValue<T, Exclusive>;

    /// A container under an [`Exclusive`] policy.
    pub type SafeContainer<T> = crate::SafeContainer<T, Exclusive>;

    /// Policy and value aliases that, during contention, will perform
    /// exponential backoff while spinning up to a threshold, then yields back
    /// to the OS scheduler.
    pub mod backoff {
        use crate::relax::YieldBackoff;

        /// An [`Exclusive`](crate::policy::Exclusive) policy that implements
        /// the [`YieldBackoff`] relax strategy.
        pub type Exclusive = crate::policy::Exclusive<YieldBackoff>;

        /// A [`SharedReadExclusiveWrite`](crate::policy::SharedReadExclusiveWrite)
        /// policy that implements the [`YieldBackoff`] relax strategy.
        pub type SharedReadExclusiveWrite = crate::policy::SharedReadExclusiveWrite<YieldBackoff>;

        /// An [`OrderedMultiLock`](crate::policy::OrderedMultiLock) policy of
        /// two tokens that implements the [`YieldBackoff`] relax strategy.
        pub type OrderedMultiLock = crate::policy::OrderedMultiLock<YieldBackoff>;

        /// A guarded value under an [`Exclusive`] policy.
        ///
        /// # Example
        ///
        /// ```
        /// use guardlock::yields::backoff::GuardedValue;
        ///
        /// let value = GuardedValue::new(0);
        /// let data = value.with_read(|data| *data);
        /// assert_eq!(data, 0);
        /// ```
        pub type GuardedValue<T> = crate::GuardedValue<T, Exclusive>;

        /// A container under an [`Exclusive`] policy.
        pub type SafeContainer<T> = crate::SafeContainer<T, Exclusive>;
    }
}

/// Policy and value aliases that rapidly spin without telling the CPU to do
/// any power down during contention.
pub mod loops {
    use crate::relax::Loop;

    /// An [`Exclusive`](crate::policy::Exclusive) policy that implements the
    /// [`Loop`] relax strategy.
    pub type Exclusive = crate::policy::Exclusive<Loop>;

    /// A [`SharedReadExclusiveWrite`](crate::policy::SharedReadExclusiveWrite)
    /// policy that implements the [`Loop`] relax strategy.
    pub type SharedReadExclusiveWrite = crate::policy::SharedReadExclusiveWrite<Loop>;

    /// An [`OrderedMultiLock`](crate::policy::OrderedMultiLock) policy of two
    /// tokens that implements the [`Loop`] relax strategy.
    pub type OrderedMultiLock = crate::policy::OrderedMultiLock<Loop>;

    /// A guarded value under an [`Exclusive`] policy.
    ///
    /// # Example
    ///
    /// ```
    /// use guardlock::loops::GuardedValue;
    ///
    /// let value = GuardedValue::new(0);
    /// let data = value.with_read(|data| *data);
    /// assert_eq!(data, 0);
    /// ```
    pub type GuardedValue<T> = crate::GuardedValue<T, Exclusive>;

    /// A container under an [`Exclusive`] policy.
    pub type SafeContainer<T> = crate::SafeContainer<T, Exclusive>;
}

#[cfg(test)]
mod test;

#[cfg(all(loom, test))]
#[cfg(not(tarpaulin))]
mod loom;
