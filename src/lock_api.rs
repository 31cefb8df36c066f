//! Locking interfaces for policies that are compatible with [lock_api].
//!
//! This module exports [`lock_api::Mutex`] and [`lock_api::RwLock`] type
//! aliases with an [`Exclusive`] and a [`SharedReadExclusiveWrite`] policy as
//! their raw locks. Those policies implement the [`lock_api::RawMutex`] and
//! the [`lock_api::RawRwLock`] traits when this feature is enabled.
//!
//! Guards returned by these types are not [`Send`]: the calling thread keeps
//! track of the tokens it holds, so a lock must be released by the same thread
//! that acquired it. Reentrant acquisitions panic with a
//! [`ContractViolation`], exactly as they do through [`GuardedValue`].
//!
//! The locks are generic over the relax strategy. The [`spins`], [`yields`]
//! and [`loops`] modules provide aliases associated with one strategy.
//!
//! [`Exclusive`]: crate::policy::Exclusive
//! [`SharedReadExclusiveWrite`]: crate::policy::SharedReadExclusiveWrite
//! [`ContractViolation`]: crate::ContractViolation
//! [`GuardedValue`]: crate::GuardedValue
//! [lock_api]: https://crates.io/crates/lock_api
//! [`lock_api::Mutex`]: https://docs.rs/lock_api/latest/lock_api/struct.Mutex.html
//! [`lock_api::RwLock`]: https://docs.rs/lock_api/latest/lock_api/struct.RwLock.html
//! [`lock_api::RawMutex`]: https://docs.rs/lock_api/latest/lock_api/trait.RawMutex.html
//! [`lock_api::RawRwLock`]: https://docs.rs/lock_api/latest/lock_api/trait.RawRwLock.html

use crate::policy::{Exclusive, LockPolicy, Mode, RawPolicy, SharedReadExclusiveWrite, Token};
use crate::relax::{DefaultRelax, Relax};

unsafe impl<R: Relax> lock_api::RawMutex for Exclusive<R> {
    type GuardMarker = lock_api::GuardNoSend;

    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Self::UNLOCKED;

    #[inline]
    fn lock(&self) {
        let _token = self.acquire(Mode::Write);
    }

    #[inline]
    fn try_lock(&self) -> bool {
        self.try_acquire(Mode::Write).is_some()
    }

    #[inline]
    unsafe fn unlock(&self) {
        // SAFETY: Caller guarantees this thread holds the lock.
        unsafe { self.release(Token::new(Mode::Write)) }
    }

    #[inline]
    fn is_locked(&self) -> bool {
        LockPolicy::is_locked(self)
    }
}

unsafe impl<R: Relax> lock_api::RawRwLock for SharedReadExclusiveWrite<R> {
    type GuardMarker = lock_api::GuardNoSend;

    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Self::UNLOCKED;

    #[inline]
    fn lock_shared(&self) {
        let _token = self.acquire(Mode::Read);
    }

    #[inline]
    fn try_lock_shared(&self) -> bool {
        RawPolicy::try_acquire(self, Mode::Read).is_some()
    }

    #[inline]
    unsafe fn unlock_shared(&self) {
        // SAFETY: Caller guarantees this thread holds shared access.
        unsafe { self.release(Token::new(Mode::Read)) }
    }

    #[inline]
    fn lock_exclusive(&self) {
        let _token = self.acquire(Mode::Write);
    }

    #[inline]
    fn try_lock_exclusive(&self) -> bool {
        RawPolicy::try_acquire(self, Mode::Write).is_some()
    }

    #[inline]
    unsafe fn unlock_exclusive(&self) {
        // SAFETY: Caller guarantees this thread holds exclusive access.
        unsafe { self.release(Token::new(Mode::Write)) }
    }

    #[inline]
    fn is_locked(&self) -> bool {
        LockPolicy::is_locked(self)
    }

    #[inline]
    fn is_locked_exclusive(&self) -> bool {
        Self::is_locked_exclusive(self)
    }
}

/// A mutual exclusion lock over an [`Exclusive`] policy that is compatible
/// with [`lock_api`](https://crates.io/crates/lock_api).
///
/// [`Exclusive`]: crate::policy::Exclusive
pub type Mutex<T, R = DefaultRelax> = lock_api::Mutex<Exclusive<R>, T>;

/// A guard that provides mutable data access that is compatible with
/// [`lock_api`](https://crates.io/crates/lock_api).
pub type MutexGuard<'a, T, R = DefaultRelax> = lock_api::MutexGuard<'a, Exclusive<R>, T>;

/// A reader-writer lock over a [`SharedReadExclusiveWrite`] policy that is
/// compatible with [`lock_api`](https://crates.io/crates/lock_api).
///
/// [`SharedReadExclusiveWrite`]: crate::policy::SharedReadExclusiveWrite
pub type RwLock<T, R = DefaultRelax> = lock_api::RwLock<SharedReadExclusiveWrite<R>, T>;

/// A guard that provides shared data access that is compatible with
/// [`lock_api`](https://crates.io/crates/lock_api).
pub type RwLockReadGuard<'a, T, R = DefaultRelax> =
    lock_api::RwLockReadGuard<'a, SharedReadExclusiveWrite<R>, T>;

/// A guard that provides mutable data access that is compatible with
/// [`lock_api`](https://crates.io/crates/lock_api).
pub type RwLockWriteGuard<'a, T, R = DefaultRelax> =
    lock_api::RwLockWriteGuard<'a, SharedReadExclusiveWrite<R>, T>;

/// Lock aliases that signal the processor that it is running a busy-wait
/// spin-loop during lock contention.
pub mod spins {
    use crate::relax::Spin;

    /// A mutex that implements the [`Spin`] relax strategy and compatible with
    /// the `lock_api` crate.
    ///
    /// # Example
    ///
    /// ```
    /// use guardlock::lock_api::spins::Mutex;
    ///
    /// let mutex = Mutex::new(0);
    /// let guard = mutex.lock();
    /// assert_eq!(*guard, 0);
    /// ```
    pub type Mutex<T> = super::Mutex<T, Spin>;

    /// A reader-writer lock that implements the [`Spin`] relax strategy and
    /// compatible with the `lock_api` crate.
    pub type RwLock<T> = super::RwLock<T, Spin>;
}

/// Lock aliases that yield the current time slice to the OS scheduler during
/// lock contention.
pub mod yields {
    use crate::relax::Yield;

    /// A mutex that implements the [`Yield`] relax strategy and compatible
    /// with the `lock_api` crate.
    ///
    /// # Example
    ///
    /// ```
    /// use guardlock::lock_api::yields::Mutex;
    ///
    /// let mutex = Mutex::new(0);
    /// let guard = mutex.lock();
    /// assert_eq!(*guard, 0);
    /// ```
    pub type Mutex<T> = super::Mutex<T, Yield>;

    /// A reader-writer lock that implements the [`Yield`] relax strategy and
    /// compatible with the `lock_api` crate.
    ///
    /// # Example
    ///
    /// ```
    /// use guardlock::lock_api::yields::RwLock;
    ///
    /// let lock = RwLock::new(5);
    /// let (r1, r2) = (lock.read(), lock.read());
    /// assert_eq!(*r1 + *r2, 10);
    /// ```
    pub type RwLock<T> = super::RwLock<T, Yield>;
}

/// Lock aliases that rapidly spin without telling the CPU to do any power down
/// during lock contention.
pub mod loops {
    use crate::relax::Loop;

    /// A mutex that implements the [`Loop`] relax strategy and compatible with
    /// the `lock_api` crate.
    pub type Mutex<T> = super::Mutex<T, Loop>;

    /// A reader-writer lock that implements the [`Loop`] relax strategy and
    /// compatible with the `lock_api` crate.
    pub type RwLock<T> = super::RwLock<T, Loop>;
}
