//! Locking policies that decide who may reach a guarded value, and when.
//!
//! A policy manages one or more protection tokens. Acquiring a policy in some
//! [`Mode`] yields a [`Token`] that must later be handed back to the same
//! policy. Values never see this pair directly: [`GuardedValue`] acquires
//! through a scoped guard that releases on every exit path, unwinding
//! included, and only lends the protected data to a closure.
//!
//! The following policies are provided:
//!
//! - [`Exclusive`]: reads and writes are both mutually exclusive.
//! - [`SharedReadExclusiveWrite`]: any number of concurrent readers, or
//!   exactly one writer.
//! - [`OrderedMultiLock`]: two or more exclusive tokens, acquired as one
//!   all-or-nothing step that cannot deadlock against other acquisitions of
//!   the same tokens, whatever order they are named in.
//!
//! Each policy is generic over a [`Relax`] strategy, applied while waiting on
//! a token held elsewhere. The [`spins`], [`yields`] and [`loops`] modules
//! provide aliases with a fixed strategy.
//!
//! ## Reentrancy
//!
//! A blocking acquisition that would wait on a token the calling thread
//! already holds can never complete. Policies detect this and panic with a
//! [`ContractViolation`] instead of hanging. Nested *shared* acquisitions of a
//! [`SharedReadExclusiveWrite`] policy are permitted: without writer
//! preference a pending writer never blocks a new reader.
//!
//! [`GuardedValue`]: crate::GuardedValue
//! [`Relax`]: crate::relax::Relax
//! [`ContractViolation`]: crate::ContractViolation
//! [`spins`]: crate::spins
//! [`yields`]: crate::yields
//! [`loops`]: crate::loops

mod exclusive;
mod ordered;
mod shared;

pub use exclusive::Exclusive;
pub use ordered::OrderedMultiLock;
pub use shared::SharedReadExclusiveWrite;

pub(crate) use ordered::MultiGuard;

use crate::context::Scope;

/// The kind of access requested from a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Shared, read-only access.
    Read,
    /// Exclusive, read-write access.
    Write,
}

/// Proof that a policy has been acquired in some [`Mode`].
///
/// Tokens can only be minted by the policies of this crate, and are always
/// handed back to the policy that produced them before the scope that
/// acquired them ends.
#[derive(Debug)]
#[must_use = "dropping a token without releasing it leaves the policy locked"]
pub struct Token {
    mode: Mode,
}

impl Token {
    /// Creates a token for a successful `mode` acquisition.
    pub(crate) const fn new(mode: Mode) -> Self {
        Self { mode }
    }

    /// Returns the mode this token was acquired with.
    pub const fn mode(&self) -> Mode {
        self.mode
    }
}

/// A locking policy that values of this crate can be generic over.
///
/// This trait is sealed. It is public so that [`GuardedValue`] and friends can
/// be generic over it, but it can only be implemented within this crate. The
/// acquire and release protocol of a policy is not part of the public API:
/// access is always scoped, through closures such as
/// [`GuardedValue::with_write`] or [`multi::lock_all`].
///
/// [`GuardedValue`]: crate::GuardedValue
/// [`GuardedValue::with_write`]: crate::GuardedValue::with_write
/// [`multi::lock_all`]: crate::multi::lock_all
pub trait LockPolicy: sealed::RawPolicy {
    /// Returns `true` if any token of this policy is currently held.
    ///
    /// This method does not provide any synchronization guarantees, so its
    /// result is only a heuristic and must be considered out of date.
    fn is_locked(&self) -> bool;
}

/// Returns the address that identifies a policy instance for reentrancy
/// tracking.
pub(crate) fn addr_of<P: ?Sized>(policy: &P) -> usize {
    (policy as *const P).cast::<()>() as usize
}

/// An RAII implementation of a scoped acquisition of a policy. When this
/// structure is dropped (falls out of scope), the token is released.
#[must_use = "if unused the policy will immediately be released"]
pub(crate) struct ScopedGuard<'a, P: LockPolicy + ?Sized> {
    policy: &'a P,
    token: Option<Token>,
    // Dropped after the token is released.
    _scope: Option<Scope<1>>,
}

impl<'a, P: LockPolicy + ?Sized> ScopedGuard<'a, P> {
    /// Blocks until `mode` access on `policy` is granted.
    ///
    /// # Panics
    ///
    /// Panics with a [`ContractViolation`] if the calling context already
    /// holds a conflicting token of `policy`, or is inside the critical
    /// section of any other value.
    ///
    /// [`ContractViolation`]: crate::ContractViolation
    #[track_caller]
    pub(crate) fn acquire(policy: &'a P, mode: Mode) -> Self {
        let scope = Scope::enter([addr_of(policy)]);
        let token = policy.acquire(mode);
        Self { policy, token: Some(token), _scope: Some(scope) }
    }

    /// Attempts to be granted `mode` access on `policy` without blocking.
    pub(crate) fn try_acquire(policy: &'a P, mode: Mode) -> Option<Self> {
        let token = policy.try_acquire(mode)?;
        Some(Self { policy, token: Some(token), _scope: None })
    }
}

impl<P: LockPolicy + ?Sized> Drop for ScopedGuard<'_, P> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            // SAFETY: The token was acquired from `self.policy` by this guard,
            // and guards are neither `Send` nor cloneable.
            unsafe { self.policy.release(token) }
        }
    }
}

pub(crate) mod sealed {
    use super::{Mode, Token};

    /// The acquire and release protocol of a policy.
    ///
    /// Being unnameable outside of this crate, this trait also restricts
    /// [`LockPolicy`] implementations to this crate.
    ///
    /// [`LockPolicy`]: super::LockPolicy
    pub trait RawPolicy {
        /// Creates a new policy with every token available.
        fn new() -> Self
        where
            Self: Sized;

        /// Blocks the current thread until `mode` access is granted.
        ///
        /// # Panics
        ///
        /// Panics with a [`ContractViolation`] if the current thread already
        /// holds a token of this policy that conflicts with `mode`.
        ///
        /// [`ContractViolation`]: crate::ContractViolation
        fn acquire(&self, mode: Mode) -> Token;

        /// Attempts to be granted `mode` access without blocking.
        ///
        /// Returns [`None`] if the access cannot be granted at this time,
        /// which includes the case where the current thread itself holds a
        /// conflicting token.
        fn try_acquire(&self, mode: Mode) -> Option<Token>;

        /// Hands a token back to this policy, making its access available
        /// again.
        ///
        /// # Safety
        ///
        /// `token` must have been produced by this very policy instance, on
        /// the current thread, and must not have been released already.
        unsafe fn release(&self, token: Token);
    }

    /// Bounds on `T` under which a value of type `T` guarded by this policy
    /// may be shared between threads.
    ///
    /// Policies that only ever grant exclusive access need `T: Send`, like
    /// `std::sync::Mutex`. Policies with concurrent readers also need
    /// `T: Sync`, like `std::sync::RwLock`.
    pub trait SyncData<T: ?Sized> {}
}

pub(crate) use sealed::{RawPolicy, SyncData};

#[cfg(all(not(loom), test))]
mod test {
    use super::{Exclusive, LockPolicy, Mode, RawPolicy, ScopedGuard};
    use crate::relax::Yield;

    #[test]
    fn scoped_guard_releases_on_drop() {
        let policy = Exclusive::<Yield>::new();
        {
            let _guard = ScopedGuard::acquire(&policy, Mode::Write);
            assert!(policy.is_locked());
        }
        assert!(!policy.is_locked());
    }

    #[test]
    fn scoped_guard_try_acquire_fails_when_held_elsewhere() {
        let policy = Exclusive::<Yield>::new();
        let guard = ScopedGuard::acquire(&policy, Mode::Write);
        let busy = std::thread::scope(|s| {
            s.spawn(|| ScopedGuard::try_acquire(&policy, Mode::Read).is_none()).join().unwrap()
        });
        assert!(busy);
        drop(guard);
        assert!(ScopedGuard::try_acquire(&policy, Mode::Read).is_some());
    }

    #[test]
    fn token_reports_its_mode() {
        let policy = Exclusive::<Yield>::new();
        let token = policy.acquire(Mode::Read);
        assert_eq!(token.mode(), Mode::Read);
        unsafe { policy.release(token) };
    }
}
