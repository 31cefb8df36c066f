use core::array;
use core::fmt;

use crate::context::ContextId;
use crate::error::ContractViolation;
use crate::policy::{addr_of, Exclusive, LockPolicy, Mode, RawPolicy, SyncData, Token};
use crate::relax::{DefaultRelax, Relax};

/// A set of tokens from distinct policies, held all at once.
///
/// Tokens are released in reverse acquisition order when the guard is dropped,
/// so a failed or unwinding combined acquisition never leaves a partial set
/// behind.
pub(crate) struct MultiGuard<'a> {
    policies: &'a [&'a dyn RawPolicy],
    held: Vec<(usize, Token)>,
}

impl<'a> MultiGuard<'a> {
    const fn empty(policies: &'a [&'a dyn RawPolicy]) -> Self {
        Self { policies, held: Vec::new() }
    }

    /// Blocks until every policy of the set is granted `mode` access.
    ///
    /// Blocks on the first policy, then only *tries* the remaining ones. If
    /// any try fails, everything held is released and the next attempt blocks
    /// on the policy that failed instead. No thread ever waits while holding a
    /// token, so no wait-for cycle can form, whatever order the set is named in.
    ///
    /// # Panics
    ///
    /// Panics with a [`ContractViolation`] if a policy is named twice, or if
    /// the current thread already holds a conflicting token of one of them.
    pub(crate) fn acquire<R: Relax>(policies: &'a [&'a dyn RawPolicy], mode: Mode) -> Self {
        check_distinct(policies);
        let len = policies.len();
        let mut first = 0;
        let mut relax = R::new();
        loop {
            let mut guard = Self::empty(policies);
            guard.held.push((first, policies[first].acquire(mode)));
            let failed = (1..len).map(|step| (first + step) % len).find(|&index| {
                match policies[index].try_acquire(mode) {
                    Some(token) => {
                        guard.held.push((index, token));
                        false
                    }
                    None => true,
                }
            });
            let Some(index) = failed else { return guard };
            drop(guard);
            tracing::trace!(index, len, ?mode, "combined acquisition backing off");
            first = index;
            relax.relax();
        }
    }

    /// Attempts to grant `mode` access on every policy without blocking.
    pub(crate) fn try_acquire(policies: &'a [&'a dyn RawPolicy], mode: Mode) -> Option<Self> {
        check_distinct(policies);
        let mut guard = Self::empty(policies);
        for (index, policy) in policies.iter().enumerate() {
            guard.held.push((index, policy.try_acquire(mode)?));
        }
        Some(guard)
    }

    /// Keeps every token held past the lifetime of this guard.
    fn disarm(mut self) {
        self.held.clear();
    }
}

impl Drop for MultiGuard<'_> {
    fn drop(&mut self) {
        for (index, token) in self.held.drain(..).rev() {
            // SAFETY: Each token was acquired from the policy at `index` by
            // this guard, on the current thread.
            unsafe { self.policies[index].release(token) }
        }
    }
}

/// Raises a [`ContractViolation`] if some policy is named more than once.
#[track_caller]
fn check_distinct(policies: &[&dyn RawPolicy]) {
    for (index, policy) in policies.iter().enumerate() {
        let addr = addr_of(*policy);
        if policies[..index].iter().any(|other| addr_of(*other) == addr) {
            ContractViolation::DuplicateInLockSet { context: ContextId::current() }.raise();
        }
    }
}

/// A policy made of `N >= 2` exclusive tokens, all acquired as one step.
///
/// Acquisition follows the same try-and-backoff algorithm as the combined
/// acquisition of several values (see [`multi`]): block on one token, try the
/// others, and on any failure release everything and retry starting from the
/// token that was busy. The naming order of the tokens therefore never
/// matters for deadlock freedom. Both [`Mode`]s are exclusive.
///
/// This models a resource guarded by several independent locks, each of which
/// must be held to touch it.
///
/// # Examples
///
/// ```
/// use guardlock::policy::OrderedMultiLock;
/// use guardlock::GuardedValue;
///
/// let value = GuardedValue::<_, OrderedMultiLock>::new(String::from("app"));
/// value.with_write(|name| name.push_str(".log"));
/// assert_eq!(value.with_read(String::clone), "app.log");
/// ```
///
/// [`multi`]: crate::multi
pub struct OrderedMultiLock<R = DefaultRelax, const N: usize = 2> {
    tokens: [Exclusive<R>; N],
}

impl<R: Relax, const N: usize> OrderedMultiLock<R, N> {
    const AT_LEAST_TWO: () = assert!(N >= 2, "an ordered multi-lock needs at least two tokens");

    /// Blocks until every token is held, naming them in `order`.
    fn acquire_in(&self, order: [usize; N]) {
        let policies: [&dyn RawPolicy; N] =
            array::from_fn(|k| &self.tokens[order[k]] as &dyn RawPolicy);
        MultiGuard::acquire::<R>(&policies, Mode::Write).disarm();
    }

    /// Returns the number of tokens currently held, across all threads.
    ///
    /// Like [`is_locked`], this is only a heuristic.
    ///
    /// [`is_locked`]: LockPolicy::is_locked
    pub fn held(&self) -> usize {
        self.tokens.iter().filter(|token| token.is_locked()).count()
    }
}

impl<R: Relax, const N: usize> RawPolicy for OrderedMultiLock<R, N> {
    fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::AT_LEAST_TWO;
        Self { tokens: array::from_fn(|_| Exclusive::new()) }
    }

    fn acquire(&self, mode: Mode) -> Token {
        self.acquire_in(array::from_fn(|k| k));
        Token::new(mode)
    }

    fn try_acquire(&self, mode: Mode) -> Option<Token> {
        let policies: [&dyn RawPolicy; N] =
            array::from_fn(|k| &self.tokens[k] as &dyn RawPolicy);
        let guard = MultiGuard::try_acquire(&policies, Mode::Write)?;
        guard.disarm();
        Some(Token::new(mode))
    }

    unsafe fn release(&self, _token: Token) {
        for token in self.tokens.iter().rev() {
            // SAFETY: Holding a multi-lock token means holding every inner
            // token, all acquired on the current thread.
            unsafe { token.release(Token::new(Mode::Write)) }
        }
    }
}

impl<R: Relax, const N: usize> LockPolicy for OrderedMultiLock<R, N> {
    fn is_locked(&self) -> bool {
        self.tokens.iter().any(LockPolicy::is_locked)
    }
}

// Both modes are exclusive, so only one holder ever reaches the data.
impl<T: ?Sized + Send, R, const N: usize> SyncData<T> for OrderedMultiLock<R, N> {}

impl<R: Relax, const N: usize> Default for OrderedMultiLock<R, N> {
    fn default() -> Self {
        <Self as RawPolicy>::new()
    }
}

impl<R: Relax, const N: usize> fmt::Debug for OrderedMultiLock<R, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderedMultiLock").field("tokens", &N).field("held", &self.held()).finish()
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use std::sync::mpsc::channel;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use super::MultiGuard;
    use crate::policy::{LockPolicy, Mode, RawPolicy};
    use crate::relax::Yield;
    use crate::test::tests;
    use crate::yields::{Exclusive, OrderedMultiLock};

    type TripleLock = crate::policy::OrderedMultiLock<Yield, 3>;

    const TRIALS: usize = 500;

    #[test]
    fn smoke() {
        tests::smoke::<OrderedMultiLock>();
    }

    #[test]
    fn lots_and_lots_write() {
        tests::lots_and_lots_write::<OrderedMultiLock>();
        tests::lots_and_lots_write::<TripleLock>();
    }

    #[test]
    fn writers_are_exclusive() {
        tests::writers_are_exclusive::<OrderedMultiLock>();
    }

    #[test]
    fn readers_are_exclusive() {
        tests::readers_are_exclusive::<OrderedMultiLock>();
    }

    #[test]
    fn release_on_error() {
        tests::release_on_error::<OrderedMultiLock>();
    }

    #[test]
    fn release_on_unwind() {
        tests::release_on_unwind::<OrderedMultiLock>();
    }

    #[test]
    #[should_panic(expected = "reentrant Write acquisition")]
    fn reentrant_write_panics() {
        tests::reentrant_acquire::<OrderedMultiLock>(Mode::Write, Mode::Write);
    }

    #[test]
    fn try_acquire_while_held_by_self() {
        tests::try_acquire_while_held_by_self::<OrderedMultiLock>(Mode::Read);
    }

    #[test]
    fn test_value_debug() {
        tests::test_value_debug::<OrderedMultiLock>();
    }

    #[test]
    fn test_into_inner() {
        tests::test_into_inner::<OrderedMultiLock>();
    }

    #[test]
    fn test_value_unsized() {
        tests::test_value_unsized::<OrderedMultiLock>();
    }

    #[test]
    fn nested_values_are_rejected() {
        tests::nested_values_are_rejected::<OrderedMultiLock, Exclusive>();
    }

    #[test]
    fn values_without_sync_data_are_shared() {
        tests::values_without_sync_data_are_shared::<OrderedMultiLock>();
    }

    #[test]
    fn every_token_is_held_and_released() {
        let policy = TripleLock::new();
        let token = policy.acquire(Mode::Write);
        assert_eq!(policy.held(), 3);
        unsafe { policy.release(token) };
        assert_eq!(policy.held(), 0);
    }

    #[test]
    fn try_acquire_is_all_or_nothing() {
        let policy = OrderedMultiLock::new();
        let second = policy.tokens[1].acquire(Mode::Write);
        let busy = thread::scope(|s| {
            s.spawn(|| policy.try_acquire(Mode::Write).is_none()).join().unwrap()
        });
        assert!(busy);
        // The first token was given back after the second one failed.
        assert_eq!(policy.held(), 1);
        unsafe { policy.tokens[1].release(second) };
    }

    #[test]
    fn opposite_naming_orders_do_not_deadlock() {
        let policy = Arc::new(OrderedMultiLock::new());
        let (tx, rx) = channel();
        for order in [[0, 1], [1, 0]] {
            let (policy, tx) = (Arc::clone(&policy), tx.clone());
            thread::spawn(move || {
                for _ in 0..TRIALS {
                    policy.acquire_in(order);
                    thread::yield_now();
                    unsafe { policy.release(crate::policy::Token::new(Mode::Write)) };
                }
                tx.send(()).unwrap();
            });
        }
        drop(tx);
        for _ in 0..2 {
            rx.recv_timeout(Duration::from_secs(30)).expect("combined acquisition deadlocked");
        }
        assert!(!policy.is_locked());
    }

    #[test]
    fn multi_guard_opposite_orders_do_not_deadlock() {
        let locks = Arc::new((Exclusive::new(), Exclusive::new()));
        let (tx, rx) = channel();
        for flip in [false, true] {
            let (locks, tx) = (Arc::clone(&locks), tx.clone());
            thread::spawn(move || {
                for _ in 0..TRIALS {
                    let (a, b): (&dyn RawPolicy, &dyn RawPolicy) = (&locks.0, &locks.1);
                    let policies = if flip { [b, a] } else { [a, b] };
                    let guard = MultiGuard::acquire::<Yield>(&policies, Mode::Write);
                    thread::yield_now();
                    drop(guard);
                }
                tx.send(()).unwrap();
            });
        }
        drop(tx);
        for _ in 0..2 {
            rx.recv_timeout(Duration::from_secs(30)).expect("combined acquisition deadlocked");
        }
        assert!(!locks.0.is_locked() && !locks.1.is_locked());
    }

    #[test]
    #[should_panic(expected = "names the same value more than once")]
    fn duplicate_policies_panic() {
        let policy = Exclusive::new();
        let policies: [&dyn RawPolicy; 2] = [&policy, &policy];
        let _guard = MultiGuard::acquire::<Yield>(&policies, Mode::Write);
    }

    #[test]
    fn multi_guard_releases_on_unwind() {
        let locks = Arc::new((Exclusive::new(), Exclusive::new()));
        let c_locks = Arc::clone(&locks);
        let _ = thread::spawn(move || {
            let policies: [&dyn RawPolicy; 2] = [&c_locks.0, &c_locks.1];
            let _guard = MultiGuard::acquire::<Yield>(&policies, Mode::Write);
            panic!();
        })
        .join();
        assert!(!locks.0.is_locked() && !locks.1.is_locked());
    }
}
