use core::fmt;
use core::marker::PhantomData;
use core::sync::atomic::Ordering::{Acquire, Relaxed, Release};

use crate::cfg::atomic::AtomicBool;
use crate::context;
use crate::policy::{addr_of, LockPolicy, Mode, RawPolicy, SyncData, Token};
use crate::relax::{DefaultRelax, Relax};

/// A policy granting one holder at a time, whatever the requested [`Mode`].
///
/// This is a test-and-test-and-set lock: contended acquisitions wait on a
/// relaxed load, applying the `R` relax strategy, and only retry the atomic
/// exchange once the token looks available. No ordering is guaranteed among
/// waiters.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::thread;
///
/// use guardlock::policy::Exclusive;
/// use guardlock::GuardedValue;
///
/// let value = Arc::new(GuardedValue::<_, Exclusive>::new(0));
/// let handles: Vec<_> = (0..4)
///     .map(|_| {
///         let value = Arc::clone(&value);
///         thread::spawn(move || value.with_write(|n| *n += 1))
///     })
///     .collect();
/// for handle in handles {
///     handle.join().unwrap();
/// }
/// assert_eq!(value.with_read(|n| *n), 4);
/// ```
pub struct Exclusive<R = DefaultRelax> {
    locked: AtomicBool,
    marker: PhantomData<R>,
}

impl<R> Exclusive<R> {
    /// An unlocked policy, for compile time initialization.
    #[cfg(not(all(loom, test)))]
    #[allow(clippy::declare_interior_mutable_const)]
    pub const UNLOCKED: Self = Self { locked: AtomicBool::new(false), marker: PhantomData };

    /// Attempts to flip the token from available to held.
    fn try_lock_acquire(&self) -> bool {
        self.locked.compare_exchange(false, true, Acquire, Relaxed).is_ok()
    }

    /// Same as `try_lock_acquire`, but may fail spuriously.
    fn try_lock_acquire_weak(&self) -> bool {
        self.locked.compare_exchange_weak(false, true, Acquire, Relaxed).is_ok()
    }
}

impl<R: Relax> Exclusive<R> {
    /// Waits with a relaxed load until the token looks available.
    fn wait_lock_relaxed(&self) {
        let mut relax = R::new();
        while self.locked.load(Relaxed) {
            relax.relax();
        }
    }
}

impl<R: Relax> RawPolicy for Exclusive<R> {
    fn new() -> Self {
        Self { locked: AtomicBool::new(false), marker: PhantomData }
    }

    fn acquire(&self, mode: Mode) -> Token {
        // Both modes are exclusive, so any held token is a conflict.
        context::check_reentry(addr_of(self), Mode::Write);
        while !self.try_lock_acquire_weak() {
            self.wait_lock_relaxed();
        }
        context::enter(addr_of(self), Mode::Write);
        Token::new(mode)
    }

    fn try_acquire(&self, mode: Mode) -> Option<Token> {
        if context::would_reenter(addr_of(self), Mode::Write) || !self.try_lock_acquire() {
            return None;
        }
        context::enter(addr_of(self), Mode::Write);
        Some(Token::new(mode))
    }

    unsafe fn release(&self, _token: Token) {
        context::exit(addr_of(self), Mode::Write);
        self.locked.store(false, Release);
    }
}

impl<R: Relax> LockPolicy for Exclusive<R> {
    fn is_locked(&self) -> bool {
        self.locked.load(Relaxed)
    }
}

// Only one holder ever reaches the data, as with `std::sync::Mutex`.
impl<T: ?Sized + Send, R> SyncData<T> for Exclusive<R> {}

impl<R> Drop for Exclusive<R> {
    fn drop(&mut self) {
        context::forget(addr_of(self));
    }
}

impl<R: Relax> Default for Exclusive<R> {
    fn default() -> Self {
        <Self as RawPolicy>::new()
    }
}

impl<R> fmt::Debug for Exclusive<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exclusive").field("locked", &self.locked.load(Relaxed)).finish()
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use crate::policy::Mode;
    use crate::test::tests;
    use crate::yields::Exclusive;

    #[test]
    fn smoke() {
        tests::smoke::<Exclusive>();
    }

    #[test]
    fn lots_and_lots_write() {
        tests::lots_and_lots_write::<Exclusive>();
    }

    #[test]
    fn writers_are_exclusive() {
        tests::writers_are_exclusive::<Exclusive>();
    }

    #[test]
    fn readers_are_exclusive() {
        tests::readers_are_exclusive::<Exclusive>();
    }

    #[test]
    fn release_on_error() {
        tests::release_on_error::<Exclusive>();
    }

    #[test]
    fn release_on_unwind() {
        tests::release_on_unwind::<Exclusive>();
    }

    #[test]
    #[should_panic(expected = "reentrant Write acquisition")]
    fn reentrant_write_panics() {
        tests::reentrant_acquire::<Exclusive>(Mode::Write, Mode::Write);
    }

    #[test]
    #[should_panic(expected = "reentrant Write acquisition")]
    fn reentrant_read_panics() {
        // Reads are exclusive too, so the nested read is reported as such.
        tests::reentrant_acquire::<Exclusive>(Mode::Read, Mode::Read);
    }

    #[test]
    fn try_acquire_while_held_by_self() {
        tests::try_acquire_while_held_by_self::<Exclusive>(Mode::Read);
    }

    #[test]
    fn test_value_debug() {
        tests::test_value_debug::<Exclusive>();
    }

    #[test]
    fn test_into_inner() {
        tests::test_into_inner::<Exclusive>();
    }

    #[test]
    fn test_into_inner_drop() {
        tests::test_into_inner_drop::<Exclusive>();
    }

    #[test]
    fn test_get_mut() {
        tests::test_get_mut::<Exclusive>();
    }

    #[test]
    fn test_value_default_from() {
        tests::test_value_default_from::<Exclusive>();
    }

    #[test]
    fn test_value_unsized() {
        tests::test_value_unsized::<Exclusive>();
    }

    #[test]
    fn nested_values_are_rejected() {
        tests::nested_values_are_rejected::<Exclusive, Exclusive>();
    }

    #[test]
    fn values_without_sync_data_are_shared() {
        tests::values_without_sync_data_are_shared::<Exclusive>();
    }

    #[test]
    fn dropped_policy_forgets_leaked_tokens() {
        tests::dropped_policy_forgets_leaked_tokens::<Exclusive>(Mode::Write);
    }

    #[test]
    fn const_unlocked() {
        use crate::policy::LockPolicy;
        static POLICY: Exclusive = Exclusive::UNLOCKED;
        assert!(!POLICY.is_locked());
    }
}

#[cfg(all(loom, test))]
mod test {
    use crate::loom::models;
    use crate::yields::Exclusive;

    #[test]
    fn write_join() {
        models::write_join::<Exclusive>();
    }

    #[test]
    fn mixed_join() {
        models::mixed_join::<Exclusive>();
    }
}
