//! Combined acquisition of several guarded values.
//!
//! Nesting [`with_write`] calls on two values, in an order chosen at each call
//! site, is the classic deadlock: one thread holds `a` and waits on `b` while
//! another holds `b` and waits on `a`. The functions of this module acquire
//! every value as one all-or-nothing step instead. They block on one policy,
//! only *try* the others, and on any failure release everything and retry
//! starting from the policy that was busy. No thread ever waits while holding
//! a token, so the naming order of the values does not matter.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use std::thread;
//!
//! use guardlock::{multi, GuardedValue};
//!
//! let checking = Arc::new(GuardedValue::<_>::new(100));
//! let savings = Arc::new(GuardedValue::<_>::new(0));
//!
//! let (c, s) = (Arc::clone(&checking), Arc::clone(&savings));
//! let to_savings = thread::spawn(move || {
//!     for _ in 0..50 {
//!         multi::lock_all(&*c, &*s, |from, to| { *from -= 1; *to += 1 });
//!     }
//! });
//! // Names the same two values in the opposite order.
//! for _ in 0..50 {
//!     multi::lock_all(&*savings, &*checking, |from, to| { *from -= 1; *to += 1 });
//! }
//! to_savings.join().unwrap();
//!
//! let total = multi::read_all(&*checking, &*savings, |c, s| c + s);
//! assert_eq!(total, 100);
//! ```
//!
//! [`with_write`]: crate::GuardedValue::with_write

use crate::context::Scope;
use crate::policy::{addr_of, LockPolicy, Mode, MultiGuard, RawPolicy};
use crate::relax::DefaultRelax;
use crate::GuardedValue;

/// Acquires exclusive access to two values at once and then runs the closure
/// against both.
///
/// Borrows of the data cannot escape the given closure.
///
/// ```compile_fail
/// use guardlock::{multi, GuardedValue};
///
/// let (a, b) = (GuardedValue::<_>::new(1), GuardedValue::<_>::new(2));
/// let data = multi::lock_all(&a, &b, |a, _| a);
/// ```
///
/// # Panics
///
/// Panics with a [`ContractViolation`] if `a` and `b` are the same value, or
/// if the current thread already holds access to either of them.
///
/// [`ContractViolation`]: crate::ContractViolation
pub fn lock_all<A, B, PA, PB, F, Ret>(a: &GuardedValue<A, PA>, b: &GuardedValue<B, PB>, f: F) -> Ret
where
    A: ?Sized,
    B: ?Sized,
    PA: LockPolicy,
    PB: LockPolicy,
    F: FnOnce(&mut A, &mut B) -> Ret,
{
    let policies: [&dyn RawPolicy; 2] = [a.policy(), b.policy()];
    let _scope = Scope::enter(policies.map(addr_of));
    let _guard = MultiGuard::acquire::<DefaultRelax>(&policies, Mode::Write);
    // SAFETY: The guard holds exclusive access to both values, which are
    // distinct since their policies are.
    unsafe { a.data_with_mut(|a| b.data_with_mut(|b| f(a, b))) }
}

/// Acquires exclusive access to three values at once and then runs the
/// closure against all of them.
///
/// # Panics
///
/// Panics with a [`ContractViolation`] if any two of the values are the same,
/// or if the current thread already holds access to any of them.
///
/// [`ContractViolation`]: crate::ContractViolation
pub fn lock_all3<A, B, C, PA, PB, PC, F, Ret>(
    a: &GuardedValue<A, PA>,
    b: &GuardedValue<B, PB>,
    c: &GuardedValue<C, PC>,
    f: F,
) -> Ret
where
    A: ?Sized,
    B: ?Sized,
    C: ?Sized,
    PA: LockPolicy,
    PB: LockPolicy,
    PC: LockPolicy,
    F: FnOnce(&mut A, &mut B, &mut C) -> Ret,
{
    let policies: [&dyn RawPolicy; 3] = [a.policy(), b.policy(), c.policy()];
    let _scope = Scope::enter(policies.map(addr_of));
    let _guard = MultiGuard::acquire::<DefaultRelax>(&policies, Mode::Write);
    // SAFETY: The guard holds exclusive access to all three distinct values.
    unsafe { a.data_with_mut(|a| b.data_with_mut(|b| c.data_with_mut(|c| f(a, b, c)))) }
}

/// Acquires shared access to two values at once and then runs the closure
/// against both.
///
/// Useful to observe a consistent state across values that are only ever
/// updated together through [`lock_all`].
///
/// # Panics
///
/// Panics with a [`ContractViolation`] if `a` and `b` are the same value, or
/// if the current thread already holds conflicting access to either of them.
///
/// [`ContractViolation`]: crate::ContractViolation
pub fn read_all<A, B, PA, PB, F, Ret>(a: &GuardedValue<A, PA>, b: &GuardedValue<B, PB>, f: F) -> Ret
where
    A: ?Sized,
    B: ?Sized,
    PA: LockPolicy,
    PB: LockPolicy,
    F: FnOnce(&A, &B) -> Ret,
{
    let policies: [&dyn RawPolicy; 2] = [a.policy(), b.policy()];
    let _scope = Scope::enter(policies.map(addr_of));
    let _guard = MultiGuard::acquire::<DefaultRelax>(&policies, Mode::Read);
    // SAFETY: The guard holds shared access to both values.
    unsafe { a.data_with(|a| b.data_with(|b| f(a, b))) }
}

#[cfg(all(not(loom), test))]
mod test {
    use std::sync::mpsc::channel;
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::Duration;

    use crate::yields::{Exclusive, SharedReadExclusiveWrite};
    use crate::GuardedValue;

    const TRIALS: usize = 1000;

    #[test]
    fn opposite_orders_do_not_deadlock() {
        let a = Arc::new(GuardedValue::<i64, Exclusive>::new(0));
        let b = Arc::new(GuardedValue::<i64, Exclusive>::new(0));
        let (tx, rx) = channel();
        for flip in [false, true] {
            let (a, b, tx) = (Arc::clone(&a), Arc::clone(&b), tx.clone());
            thread::spawn(move || {
                for _ in 0..TRIALS {
                    let (first, second) = if flip { (&*b, &*a) } else { (&*a, &*b) };
                    super::lock_all(first, second, |x, y| {
                        *x += 1;
                        *y += 1;
                    });
                }
                tx.send(()).unwrap();
            });
        }
        drop(tx);
        for _ in 0..2 {
            rx.recv_timeout(Duration::from_secs(30)).expect("combined acquisition deadlocked");
        }
        let expected = 2 * TRIALS as i64;
        assert_eq!(super::read_all(&*a, &*b, |x, y| (*x, *y)), (expected, expected));
    }

    #[test]
    fn three_values_are_updated_together() {
        let a = GuardedValue::<_, Exclusive>::new(1);
        let b = GuardedValue::<_, SharedReadExclusiveWrite>::new(String::from("b"));
        let c = GuardedValue::<_, Exclusive>::new(vec![3]);
        let len = super::lock_all3(&a, &b, &c, |a, b, c| {
            *a += 1;
            b.push('!');
            c.push(*a);
            c.len()
        });
        assert_eq!(len, 2);
        assert!(!a.is_locked() && !b.is_locked() && !c.is_locked());
        assert_eq!(b.with_read(String::clone), "b!");
        assert_eq!(c.into_inner(), vec![3, 2]);
    }

    #[test]
    fn shared_reads_run_concurrently() {
        let a = Arc::new(GuardedValue::<_, SharedReadExclusiveWrite>::new(1));
        let b = Arc::new(GuardedValue::<_, SharedReadExclusiveWrite>::new(2));
        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let (a, b, barrier) = (a.clone(), b.clone(), barrier.clone());
                thread::spawn(move || {
                    super::read_all(&*a, &*b, |x, y| {
                        barrier.wait();
                        x + y
                    })
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), 3);
        }
    }

    #[test]
    fn releases_on_error() {
        let a = GuardedValue::<_, Exclusive>::new(0);
        let b = GuardedValue::<_, Exclusive>::new(0);
        let result: Result<(), &str> = super::lock_all(&a, &b, |_, _| Err("rejected"));
        assert!(result.is_err());
        assert!(!a.is_locked() && !b.is_locked());
    }

    #[test]
    #[should_panic(expected = "names the same value more than once")]
    fn same_value_twice_panics() {
        let a = GuardedValue::<_, Exclusive>::new(0);
        super::lock_all(&a, &a, |_, _| ());
    }

    #[test]
    #[should_panic(expected = "reentrant Write acquisition")]
    fn value_held_by_caller_panics() {
        let a = GuardedValue::<_, Exclusive>::new(0);
        let b = GuardedValue::<_, Exclusive>::new(0);
        a.with_write(|_| super::lock_all(&a, &b, |_, _| ()));
    }

    #[test]
    #[should_panic(expected = "nested acquisition by ctx-")]
    fn combined_acquisition_inside_another_value_panics() {
        let (a, b) = (GuardedValue::<_, Exclusive>::new(0), GuardedValue::<_, Exclusive>::new(0));
        let c = GuardedValue::<_, Exclusive>::new(0);
        c.with_read(|_| super::lock_all(&a, &b, |_, _| ()));
    }

    #[test]
    fn value_inside_combined_acquisition_panics_and_releases() {
        let a = Arc::new(GuardedValue::<_, Exclusive>::new(0));
        let b = Arc::new(GuardedValue::<_, Exclusive>::new(0));
        let c = Arc::new(GuardedValue::<_, Exclusive>::new(0));
        let (c_a, c_b, c_c) = (a.clone(), b.clone(), c.clone());
        let result = thread::spawn(move || {
            super::lock_all(&*c_a, &*c_b, |_, _| c_c.with_write(|n| *n += 1));
        })
        .join();
        let payload = result.unwrap_err();
        let message = payload.downcast_ref::<String>().unwrap();
        assert!(message.starts_with("nested acquisition by ctx-"), "{message}");
        assert!(!a.is_locked() && !b.is_locked() && !c.is_locked());
        assert_eq!(super::read_all(&*a, &*c, |a, c| (*a, *c)), (0, 0));
    }
}
