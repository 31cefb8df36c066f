use core::fmt;
use core::marker::PhantomData;
use core::sync::atomic::Ordering::{Acquire, Relaxed, Release};

use crate::cfg::atomic::AtomicUsize;
use crate::context;
use crate::policy::{addr_of, LockPolicy, Mode, RawPolicy, SyncData, Token};
use crate::relax::{DefaultRelax, Relax};

/// State value of a policy held by a writer.
const WRITER: usize = usize::MAX;

/// Upper bound of concurrent readers, so the count never reaches `WRITER`.
const MAX_READERS: usize = WRITER - 1;

/// A policy granting either any number of readers or a single writer.
///
/// The state is one atomic word: `0` when free, the reader count while shared
/// and a sentinel while exclusive. Readers are admitted whenever no writer
/// holds the token, even if a writer is waiting, so a continuous stream of
/// readers may starve writers indefinitely. No ordering is guaranteed among
/// waiting writers either.
///
/// # Examples
///
/// ```
/// use std::sync::{Arc, Barrier};
/// use std::thread;
///
/// use guardlock::policy::SharedReadExclusiveWrite;
/// use guardlock::GuardedValue;
///
/// const READERS: usize = 3;
///
/// let value = Arc::new(GuardedValue::<_, SharedReadExclusiveWrite>::new(7));
/// let barrier = Arc::new(Barrier::new(READERS));
///
/// // Every reader waits for all the others while holding shared access, which
/// // could only complete if the reads are in fact concurrent.
/// let handles: Vec<_> = (0..READERS)
///     .map(|_| {
///         let (value, barrier) = (Arc::clone(&value), Arc::clone(&barrier));
///         thread::spawn(move || value.with_read(|n| { barrier.wait(); *n }))
///     })
///     .collect();
/// for handle in handles {
///     assert_eq!(handle.join().unwrap(), 7);
/// }
/// ```
pub struct SharedReadExclusiveWrite<R = DefaultRelax> {
    state: AtomicUsize,
    marker: PhantomData<R>,
}

impl<R> SharedReadExclusiveWrite<R> {
    /// An unlocked policy, for compile time initialization.
    #[cfg(not(all(loom, test)))]
    #[allow(clippy::declare_interior_mutable_const)]
    pub const UNLOCKED: Self = Self { state: AtomicUsize::new(0), marker: PhantomData };

    /// Attempts to join the current readers, if there is no writer.
    fn try_lock_shared(&self) -> bool {
        let mut state = self.state.load(Relaxed);
        while state < MAX_READERS {
            match self.state.compare_exchange_weak(state, state + 1, Acquire, Relaxed) {
                Ok(_) => return true,
                Err(current) => state = current,
            }
        }
        false
    }

    /// Attempts to move the state from free to held by a writer.
    fn try_lock_exclusive(&self) -> bool {
        self.state.compare_exchange(0, WRITER, Acquire, Relaxed).is_ok()
    }
}

impl<R: Relax> SharedReadExclusiveWrite<R> {
    /// Waits with a relaxed load until readers could be admitted.
    fn wait_shared_relaxed(&self) {
        let mut relax = R::new();
        while self.state.load(Relaxed) >= MAX_READERS {
            relax.relax();
        }
    }

    /// Waits with a relaxed load until the state looks free.
    fn wait_exclusive_relaxed(&self) {
        let mut relax = R::new();
        while self.state.load(Relaxed) != 0 {
            relax.relax();
        }
    }

    fn try_lock(&self, mode: Mode) -> bool {
        match mode {
            Mode::Read => self.try_lock_shared(),
            Mode::Write => self.try_lock_exclusive(),
        }
    }
}

impl<R: Relax> RawPolicy for SharedReadExclusiveWrite<R> {
    fn new() -> Self {
        Self { state: AtomicUsize::new(0), marker: PhantomData }
    }

    fn acquire(&self, mode: Mode) -> Token {
        context::check_reentry(addr_of(self), mode);
        while !self.try_lock(mode) {
            match mode {
                Mode::Read => self.wait_shared_relaxed(),
                Mode::Write => self.wait_exclusive_relaxed(),
            }
        }
        context::enter(addr_of(self), mode);
        Token::new(mode)
    }

    fn try_acquire(&self, mode: Mode) -> Option<Token> {
        if context::would_reenter(addr_of(self), mode) || !self.try_lock(mode) {
            return None;
        }
        context::enter(addr_of(self), mode);
        Some(Token::new(mode))
    }

    unsafe fn release(&self, token: Token) {
        context::exit(addr_of(self), token.mode());
        match token.mode() {
            Mode::Read => self.state.fetch_sub(1, Release),
            Mode::Write => self.state.swap(0, Release),
        };
    }
}

impl<R: Relax> LockPolicy for SharedReadExclusiveWrite<R> {
    fn is_locked(&self) -> bool {
        self.state.load(Relaxed) != 0
    }
}

// Readers share `&T` across threads, as with `std::sync::RwLock`.
impl<T: ?Sized + Send + Sync, R> SyncData<T> for SharedReadExclusiveWrite<R> {}

impl<R> Drop for SharedReadExclusiveWrite<R> {
    fn drop(&mut self) {
        context::forget(addr_of(self));
    }
}

impl<R> SharedReadExclusiveWrite<R> {
    /// Returns the number of readers currently holding shared access.
    ///
    /// Like [`is_locked`], this is only a heuristic.
    ///
    /// [`is_locked`]: LockPolicy::is_locked
    pub fn readers(&self) -> usize {
        match self.state.load(Relaxed) {
            WRITER => 0,
            readers => readers,
        }
    }

    /// Returns `true` if a writer currently holds exclusive access.
    ///
    /// Like [`is_locked`], this is only a heuristic.
    ///
    /// [`is_locked`]: LockPolicy::is_locked
    pub fn is_locked_exclusive(&self) -> bool {
        self.state.load(Relaxed) == WRITER
    }
}

impl<R: Relax> Default for SharedReadExclusiveWrite<R> {
    fn default() -> Self {
        <Self as RawPolicy>::new()
    }
}

impl<R> fmt::Debug for SharedReadExclusiveWrite<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedReadExclusiveWrite")
            .field("readers", &self.readers())
            .field("writer", &self.is_locked_exclusive())
            .finish()
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use crate::policy::{LockPolicy, Mode, RawPolicy};
    use crate::test::{tests, Int};
    use crate::yields::SharedReadExclusiveWrite;

    #[test]
    fn smoke() {
        tests::smoke::<SharedReadExclusiveWrite>();
    }

    #[test]
    fn lots_and_lots_write() {
        tests::lots_and_lots_write::<SharedReadExclusiveWrite>();
    }

    #[test]
    fn writers_are_exclusive() {
        tests::writers_are_exclusive::<SharedReadExclusiveWrite>();
    }

    #[test]
    fn readers_are_concurrent() {
        tests::readers_are_concurrent::<SharedReadExclusiveWrite>();
    }

    #[test]
    fn writers_observe_no_readers() {
        tests::writers_observe_no_readers::<SharedReadExclusiveWrite>();
    }

    #[test]
    fn release_on_error() {
        tests::release_on_error::<SharedReadExclusiveWrite>();
    }

    #[test]
    fn release_on_unwind() {
        tests::release_on_unwind::<SharedReadExclusiveWrite>();
    }

    #[test]
    #[should_panic(expected = "reentrant Write acquisition")]
    fn reentrant_write_after_read_panics() {
        tests::reentrant_acquire::<SharedReadExclusiveWrite>(Mode::Read, Mode::Write);
    }

    #[test]
    #[should_panic(expected = "reentrant Read acquisition")]
    fn reentrant_read_after_write_panics() {
        tests::reentrant_acquire::<SharedReadExclusiveWrite>(Mode::Write, Mode::Read);
    }

    #[test]
    fn nested_reads_are_permitted() {
        let policy = SharedReadExclusiveWrite::new();
        let outer = policy.acquire(Mode::Read);
        let inner = policy.acquire(Mode::Read);
        assert_eq!(policy.readers(), 2);
        assert!(policy.try_acquire(Mode::Write).is_none());
        unsafe { policy.release(inner) };
        unsafe { policy.release(outer) };
        assert!(!policy.is_locked());
    }

    #[test]
    fn try_acquire_while_held_by_self() {
        tests::try_acquire_while_held_by_self::<SharedReadExclusiveWrite>(Mode::Write);
    }

    #[test]
    fn state_accessors() {
        let policy = SharedReadExclusiveWrite::new();
        let token = policy.acquire(Mode::Write);
        assert!(policy.is_locked_exclusive());
        assert_eq!(policy.readers(), 0);
        unsafe { policy.release(token) };
        assert!(!policy.is_locked_exclusive());
    }

    #[test]
    fn test_value_debug() {
        tests::test_value_debug::<SharedReadExclusiveWrite>();
    }

    #[test]
    fn test_into_inner() {
        tests::test_into_inner::<SharedReadExclusiveWrite>();
    }

    #[test]
    fn test_into_inner_drop() {
        tests::test_into_inner_drop::<SharedReadExclusiveWrite>();
    }

    #[test]
    fn test_get_mut() {
        tests::test_get_mut::<SharedReadExclusiveWrite>();
    }

    #[test]
    fn test_value_default_from() {
        tests::test_value_default_from::<SharedReadExclusiveWrite>();
    }

    #[test]
    fn test_value_unsized() {
        tests::test_value_unsized::<SharedReadExclusiveWrite>();
    }

    #[test]
    fn nested_values_are_rejected() {
        tests::nested_values_are_rejected::<SharedReadExclusiveWrite, SharedReadExclusiveWrite>();
    }

    #[test]
    fn nested_reads_of_one_value_are_permitted() {
        let value = crate::GuardedValue::<_, SharedReadExclusiveWrite>::new(1);
        let sum = value.with_read(|outer| value.with_read(|inner| outer + inner));
        assert_eq!(sum, 2);
        assert!(!value.is_locked());
    }

    #[test]
    fn readers_require_sync_data() {
        fn assert_sync<T: Sync>() {}
        assert_sync::<crate::GuardedValue<Int, SharedReadExclusiveWrite>>();
        assert_sync::<crate::GuardedValue<std::sync::Mutex<Int>, SharedReadExclusiveWrite>>();
    }

    #[test]
    fn dropped_policy_forgets_leaked_tokens() {
        tests::dropped_policy_forgets_leaked_tokens::<SharedReadExclusiveWrite>(Mode::Read);
    }
}

#[cfg(all(loom, test))]
mod test {
    use crate::loom::models;
    use crate::yields::SharedReadExclusiveWrite;

    #[test]
    fn write_join() {
        models::write_join::<SharedReadExclusiveWrite>();
    }

    #[test]
    fn mixed_join() {
        models::mixed_join::<SharedReadExclusiveWrite>();
    }

    #[test]
    fn read_write_join() {
        models::read_write_join::<SharedReadExclusiveWrite>();
    }
}
