use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::channel;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use guardlock::policy::{Exclusive, OrderedMultiLock, SharedReadExclusiveWrite};
use guardlock::{multi, Error, GuardedValue, SafeContainer, SafeCounter};

#[test]
fn two_threads_increment_to_twenty_thousand() {
    let value = Arc::new(GuardedValue::<i32, Exclusive>::new(0));
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let value = Arc::clone(&value);
            thread::spawn(move || {
                for _ in 0..10_000 {
                    value.with_write(|n| *n += 1);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(value.with_read(|n| *n), 20_000);
}

#[test]
fn counter_reaches_twenty_thousand() {
    let counter = Arc::new(SafeCounter::new());
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let counter = Arc::clone(&counter);
            thread::spawn(move || (0..10_000).for_each(|_| counter.increment()))
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(counter.get(), 20_000);
}

#[test]
fn pushers_and_drainers_lose_and_duplicate_nothing() {
    let stack = Arc::new(SafeContainer::<i32>::new());
    let done = Arc::new(AtomicBool::new(false));

    let pushers: Vec<_> = (0..2)
        .map(|_| {
            let stack = Arc::clone(&stack);
            thread::spawn(move || (0..10_000).for_each(|n| stack.push(n)))
        })
        .collect();
    let drainers: Vec<_> = (0..2)
        .map(|_| {
            let (stack, done) = (Arc::clone(&stack), Arc::clone(&done));
            thread::spawn(move || {
                let mut popped = Vec::new();
                loop {
                    match stack.try_pop() {
                        Some(n) => popped.push(n),
                        // Only give up once no more pushes can arrive.
                        None if done.load(Ordering::Acquire) => match stack.try_pop() {
                            Some(n) => popped.push(n),
                            None => break popped,
                        },
                        None => thread::yield_now(),
                    }
                }
            })
        })
        .collect();

    for pusher in pushers {
        pusher.join().unwrap();
    }
    done.store(true, Ordering::Release);

    let mut counts = HashMap::new();
    for drainer in drainers {
        for n in drainer.join().unwrap() {
            *counts.entry(n).or_insert(0) += 1;
        }
    }
    assert_eq!(counts.values().sum::<usize>(), 20_000);
    assert!(counts.values().all(|&count| count == 2));
    assert_eq!(counts.len(), 10_000);
    assert!(stack.is_empty());
}

#[test]
fn producers_and_consumers_through_shared_policy() {
    const PRODUCERS: usize = 4;
    const ITEMS: usize = 2_500;

    let container = Arc::new(SafeContainer::<_, SharedReadExclusiveWrite>::new());
    let (tx, rx) = channel();
    for producer in 0..PRODUCERS {
        let container = Arc::clone(&container);
        let tx = tx.clone();
        thread::spawn(move || {
            for item in 0..ITEMS {
                container.push((producer, item));
            }
            tx.send(()).unwrap();
        });
    }
    drop(tx);
    for _ in 0..PRODUCERS {
        rx.recv().unwrap();
    }
    assert_eq!(container.len(), PRODUCERS * ITEMS);

    let consumers: Vec<_> = (0..PRODUCERS)
        .map(|_| {
            let container = Arc::clone(&container);
            thread::spawn(move || std::iter::from_fn(|| container.try_pop()).collect::<Vec<_>>())
        })
        .collect();
    let mut all: Vec<_> = consumers.into_iter().flat_map(|c| c.join().unwrap()).collect();
    all.sort_unstable();
    all.dedup();
    assert_eq!(all.len(), PRODUCERS * ITEMS);
}

#[test]
fn pop_on_fresh_container_is_empty_error() {
    let stack = SafeContainer::<i32>::new();
    let error = stack.pop().unwrap_err();
    assert!(matches!(error, Error::EmptyContainer));
    assert_eq!(error.to_string(), "container is empty");
}

#[test]
fn snapshots_do_not_leak() {
    let stack = SafeContainer::<Vec<i32>>::new();
    stack.push(vec![1]);
    stack.push(vec![2]);
    let mut snapshot = stack.snapshot();
    snapshot[0].push(10);
    snapshot.clear();
    assert_eq!(stack.snapshot(), vec![vec![1], vec![2]]);
}

#[test]
fn opposite_order_transfers_complete() {
    const TRIALS: i64 = 2_000;
    let a = Arc::new(GuardedValue::<i64>::new(TRIALS));
    let b = Arc::new(GuardedValue::<i64>::new(TRIALS));
    let (tx, rx) = channel();
    for flip in [false, true] {
        let (a, b, tx) = (Arc::clone(&a), Arc::clone(&b), tx.clone());
        thread::spawn(move || {
            let (from, to) = if flip { (&*b, &*a) } else { (&*a, &*b) };
            for _ in 0..TRIALS {
                multi::lock_all(from, to, |from, to| {
                    *from -= 1;
                    *to += 1;
                });
            }
            tx.send(()).unwrap();
        });
    }
    drop(tx);
    for _ in 0..2 {
        rx.recv_timeout(Duration::from_secs(60)).expect("transfers deadlocked");
    }
    assert_eq!(multi::read_all(&*a, &*b, |a, b| (*a, *b)), (TRIALS, TRIALS));
}

#[test]
fn multi_lock_policy_guards_a_value() {
    let value = Arc::new(GuardedValue::<u64, OrderedMultiLock>::new(0));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let value = Arc::clone(&value);
            thread::spawn(move || (0..1_000).for_each(|_| value.with_write(|n| *n += 1)))
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(value.with_read(|n| *n), 4_000);
}

#[test]
fn reentrant_write_is_a_contract_violation() {
    let value = Arc::new(GuardedValue::<i32>::new(0));
    let c_value = Arc::clone(&value);
    let result = thread::spawn(move || c_value.with_write(|_| c_value.with_write(|_| ()))).join();
    let payload = result.unwrap_err();
    let message = payload.downcast_ref::<String>().unwrap();
    assert!(message.starts_with("reentrant Write acquisition by ctx-"), "{message}");
    // The outer token was released while unwinding.
    assert!(!value.is_locked());
    value.with_write(|n| *n += 1);
}

#[test]
fn nesting_independent_values_is_a_contract_violation() {
    let a = Arc::new(GuardedValue::<i32>::new(1));
    let b = Arc::new(GuardedValue::<i32>::new(2));
    let (c_a, c_b) = (Arc::clone(&a), Arc::clone(&b));
    let result = thread::spawn(move || c_a.with_write(|a| c_b.with_write(|b| *a += *b))).join();
    let payload = result.unwrap_err();
    let message = payload.downcast_ref::<String>().unwrap();
    assert!(message.starts_with("nested acquisition by ctx-"), "{message}");
    assert!(!a.is_locked() && !b.is_locked());
    multi::lock_all(&*a, &*b, |a, b| *a += *b);
    assert_eq!(a.with_read(|n| *n), 3);
}

#[test]
fn every_relax_module_has_the_same_aliases() {
    macro_rules! exercise {
        ($($($segment:ident)::+),+) => {$({
            let value = guardlock::$($segment)::+::GuardedValue::new(1);
            let shared = GuardedValue::<_, guardlock::$($segment)::+::SharedReadExclusiveWrite>::new(2);
            let ordered = GuardedValue::<_, guardlock::$($segment)::+::OrderedMultiLock>::new(3);
            let container = guardlock::$($segment)::+::SafeContainer::<i32>::new();
            container.push(value.with_read(|n| *n));
            container.push(shared.with_read(|n| *n));
            container.push(ordered.with_write(|n| *n));
            assert_eq!(container.snapshot(), vec![1, 2, 3]);
            assert!(!<guardlock::$($segment)::+::Exclusive as Default>::default().is_locked());
        })+};
    }
    use guardlock::policy::LockPolicy;
    exercise!(spins, spins::backoff, yields, yields::backoff, loops);
}
