use crate::cfg::sync::Arc;
use crate::policy::LockPolicy;
#[cfg(not(loom))]
use crate::policy::Mode;
use crate::GuardedValue;

/// An arbitrary unsigned integer type.
pub type Int = u32;

/// Get a copy of the guarded integer.
pub fn get<P: LockPolicy>(value: &Arc<GuardedValue<Int, P>>) -> Int {
    value.with_read(|data| *data)
}

/// Increments a guarded integer.
pub fn inc<P: LockPolicy>(value: &Arc<GuardedValue<Int, P>>) {
    value.with_write(|data| *data += 1);
}

/// Runs `f` while holding `mode` access on `value`.
#[cfg(not(loom))]
pub fn access<T, P, F, Ret>(value: &GuardedValue<T, P>, mode: Mode, f: F) -> Ret
where
    P: LockPolicy,
    F: FnOnce() -> Ret,
{
    match mode {
        Mode::Read => value.with_read(|_| f()),
        Mode::Write => value.with_write(|_| f()),
    }
}

#[cfg(all(not(loom), test))]
pub mod tests {
    // Modified test suite from the Rust's Mutex implementation with minor changes
    // since the API is not compatible with this crate implementation and some
    // new tests as well.
    //
    // Copyright 2014 The Rust Project Developers.
    //
    // Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
    // http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
    // <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
    // option. This file may not be copied, modified, or distributed
    // except according to those terms.

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc::channel;
    use std::sync::{Arc, Barrier};
    use std::thread;

    use core::cell::Cell;

    use super::{access, get, inc, Int};
    use crate::context;
    use crate::multi;
    use crate::policy::{addr_of, LockPolicy, Mode, RawPolicy, ScopedGuard, SyncData};
    use crate::GuardedValue;

    #[derive(Eq, PartialEq, Debug, Default)]
    pub struct NonCopy(u32);

    pub struct Foo(Arc<AtomicUsize>);

    impl Drop for Foo {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    const ITERS: Int = 1000;
    const THREADS: Int = 4;
    const EXPECTED_VALUE: Int = ITERS * THREADS;

    fn inc_for<P: LockPolicy, const END: Int>(value: &Arc<GuardedValue<Int, P>>) {
        for _ in 0..END {
            inc(value);
        }
    }

    fn lots_and_lots<P, const THREADS: Int>(f: fn(&Arc<GuardedValue<Int, P>>)) -> Int
    where
        P: LockPolicy + SyncData<Int> + Send + Sync + 'static,
    {
        let value = Arc::new(GuardedValue::new(0));
        let (tx, rx) = channel();
        for _ in 0..THREADS {
            let c_value = Arc::clone(&value);
            let c_tx = tx.clone();
            thread::spawn(move || {
                f(&c_value);
                c_tx.send(()).unwrap();
            });
        }
        drop(tx);
        for _ in 0..THREADS {
            rx.recv().unwrap();
        }
        get(&value)
    }

    /// Spawns `THREADS` threads that each enter `mode` access `ITERS` times
    /// and report the highest number of threads seen inside at once.
    fn max_inside<P>(mode: Mode) -> usize
    where
        P: LockPolicy + SyncData<Int> + Send + Sync + 'static,
    {
        let value = Arc::new(GuardedValue::<Int, P>::new(0));
        let inside = Arc::new(AtomicUsize::new(0));
        let max = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let (value, inside, max) = (value.clone(), inside.clone(), max.clone());
                thread::spawn(move || {
                    for _ in 0..ITERS {
                        access(&value, mode, || {
                            let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                            max.fetch_max(now, Ordering::SeqCst);
                            thread::yield_now();
                            inside.fetch_sub(1, Ordering::SeqCst);
                        });
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        max.load(Ordering::SeqCst)
    }

    pub fn smoke<P: LockPolicy>() {
        let value = GuardedValue::<Int, P>::new(1);
        value.with_write(|data| *data += 1);
        value.with_read(|data| assert_eq!(*data, 2));
        value.with_write(|_data| ());
        assert!(!value.is_locked());
    }

    pub fn lots_and_lots_write<P>()
    where
        P: LockPolicy + SyncData<Int> + Send + Sync + 'static,
    {
        let value = lots_and_lots::<P, THREADS>(inc_for::<P, ITERS>);
        assert_eq!(value, EXPECTED_VALUE);
    }

    pub fn writers_are_exclusive<P>()
    where
        P: LockPolicy + SyncData<Int> + Send + Sync + 'static,
    {
        assert_eq!(max_inside::<P>(Mode::Write), 1);
    }

    pub fn readers_are_exclusive<P>()
    where
        P: LockPolicy + SyncData<Int> + Send + Sync + 'static,
    {
        assert_eq!(max_inside::<P>(Mode::Read), 1);
    }

    pub fn readers_are_concurrent<P>()
    where
        P: LockPolicy + SyncData<Int> + Send + Sync + 'static,
    {
        const READERS: usize = 4;
        let value = Arc::new(GuardedValue::<Int, P>::new(7));
        let barrier = Arc::new(Barrier::new(READERS));
        let handles: Vec<_> = (0..READERS)
            .map(|_| {
                let (value, barrier) = (value.clone(), barrier.clone());
                // Only completes if all readers are inside at the same time.
                thread::spawn(move || value.with_read(|data| {
                    barrier.wait();
                    *data
                }))
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), 7);
        }
        assert!(!value.is_locked());
    }

    pub fn writers_observe_no_readers<P>()
    where
        P: LockPolicy + SyncData<Int> + Send + Sync + 'static,
    {
        let value = Arc::new(GuardedValue::<Int, P>::new(0));
        let readers = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..THREADS)
            .map(|index| {
                let (value, readers) = (value.clone(), readers.clone());
                thread::spawn(move || {
                    for _ in 0..ITERS {
                        if index % 2 == 0 {
                            value.with_write(|data| {
                                assert_eq!(readers.load(Ordering::SeqCst), 0);
                                *data += 1;
                            });
                        } else {
                            value.with_read(|_| {
                                readers.fetch_add(1, Ordering::SeqCst);
                                thread::yield_now();
                                readers.fetch_sub(1, Ordering::SeqCst);
                            });
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(get(&value), ITERS * THREADS / 2);
    }

    pub fn release_on_error<P: LockPolicy>() {
        let value = Arc::new(GuardedValue::<Int, P>::new(0));
        let result: Result<(), &str> = value.with_write(|data| {
            *data += 1;
            Err("rejected")
        });
        assert_eq!(result, Err("rejected"));
        assert!(!value.is_locked());
        inc(&value);
        assert_eq!(get(&value), 2);
    }

    pub fn release_on_unwind<P>()
    where
        P: LockPolicy + SyncData<Int> + Send + Sync + 'static,
    {
        let value = Arc::new(GuardedValue::<Int, P>::new(1));
        let c_value = Arc::clone(&value);
        let result = thread::spawn(move || {
            struct Unwinder<P: LockPolicy> {
                i: Arc<GuardedValue<Int, P>>,
            }
            impl<P: LockPolicy> Drop for Unwinder<P> {
                fn drop(&mut self) {
                    inc(&self.i);
                }
            }
            let u = Unwinder { i: c_value };
            u.i.with_write(|data| {
                *data += 1;
                panic!("mutation aborted");
            });
        })
        .join();
        assert!(result.is_err());
        assert!(!value.is_locked());
        assert_eq!(get(&value), 3);
    }

    pub fn reentrant_acquire<P: LockPolicy>(first: Mode, second: Mode) {
        let value = GuardedValue::<Int, P>::new(0);
        access(&value, first, || access(&value, second, || ()));
    }

    pub fn try_acquire_while_held_by_self<P: LockPolicy>(mode: Mode) {
        let value = GuardedValue::<Int, P>::new(0);
        access(&value, mode, || {
            assert!(value.is_locked());
            let busy = ScopedGuard::try_acquire(value.policy(), Mode::Write).is_none();
            assert!(busy);
        });
        assert!(ScopedGuard::try_acquire(value.policy(), Mode::Write).is_some());
    }

    pub fn test_value_debug<P: LockPolicy>() {
        let data = 42;
        let value = GuardedValue::<Int, P>::new(data);
        let msg = format!("GuardedValue {{ data: {data:?} }}");
        assert_eq!(msg, format!("{value:?}"));

        let msg = "GuardedValue { data: <locked> }".to_string();
        value.with_write(|_data| {
            assert_eq!(msg, format!("{value:?}"));
        });
    }

    pub fn test_value_default_from<P: LockPolicy>() {
        let value: GuardedValue<Int, P> = Default::default();
        assert_eq!(Int::default(), value.into_inner());

        let value = GuardedValue::<Int, P>::from(42);
        assert_eq!(42, value.into_inner());
    }

    pub fn test_into_inner<P: LockPolicy>() {
        let value = GuardedValue::<_, P>::new(NonCopy(10));
        assert_eq!(value.into_inner(), NonCopy(10));
    }

    pub fn test_into_inner_drop<P: LockPolicy>() {
        let num_drops = Arc::new(AtomicUsize::new(0));
        let value = GuardedValue::<_, P>::new(Foo(num_drops.clone()));
        assert_eq!(num_drops.load(Ordering::SeqCst), 0);
        {
            let _inner = value.into_inner();
            assert_eq!(num_drops.load(Ordering::SeqCst), 0);
        }
        assert_eq!(num_drops.load(Ordering::SeqCst), 1);
    }

    pub fn test_get_mut<P: LockPolicy>() {
        let mut value = GuardedValue::<_, P>::new(NonCopy(10));
        *value.get_mut() = NonCopy(20);
        assert_eq!(value.into_inner(), NonCopy(20));
    }

    pub fn nested_values_are_rejected<P1, P2>()
    where
        P1: LockPolicy + SyncData<Int> + Send + Sync + 'static,
        P2: LockPolicy + SyncData<Int> + Send + Sync + 'static,
    {
        let outer = Arc::new(GuardedValue::<Int, P1>::new(1));
        let inner = Arc::new(GuardedValue::<Int, P2>::new(2));
        let (c_outer, c_inner) = (Arc::clone(&outer), Arc::clone(&inner));
        let result = thread::spawn(move || {
            c_outer.with_read(|_| c_inner.with_write(|n| *n += 1));
        })
        .join();
        let payload = result.unwrap_err();
        let msg = payload.downcast_ref::<String>().unwrap();
        assert!(msg.starts_with("nested acquisition by ctx-"), "{msg}");
        assert!(!outer.is_locked());
        assert!(!inner.is_locked());
        // The combined form of the same acquisition is the supported one.
        assert_eq!(multi::read_all(&*outer, &*inner, |a, b| a + b), 3);
    }

    pub fn values_without_sync_data_are_shared<P>()
    where
        P: LockPolicy + SyncData<Cell<Int>> + Send + Sync + 'static,
    {
        let value = Arc::new(GuardedValue::<_, P>::new(Cell::new(0)));
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let value = Arc::clone(&value);
                thread::spawn(move || {
                    for _ in 0..ITERS {
                        value.with_write(|cell| cell.set(cell.get() + 1));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(value.with_read(Cell::get), EXPECTED_VALUE);
    }

    pub fn dropped_policy_forgets_leaked_tokens<P: LockPolicy>(mode: Mode) {
        for _ in 0..8 {
            let addr = {
                let policy = P::new();
                core::mem::forget(policy.acquire(mode));
                assert!(context::would_reenter(addr_of(&policy), Mode::Write));
                addr_of(&policy)
            };
            assert!(!context::would_reenter(addr, Mode::Write));
            // A fresh policy likely reuses the same stack slot.
            let value = GuardedValue::<Int, P>::new(0);
            value.with_write(|n| *n += 1);
            assert_eq!(value.into_inner(), 1);
        }
    }

    pub fn test_value_unsized<P: LockPolicy>() {
        let value: &GuardedValue<[Int], P> = &GuardedValue::<[Int; 3], P>::new([1, 2, 3]);
        value.with_write(|data| {
            data[0] = 4;
            data[2] = 5;
        });
        let comp: &[Int] = &[4, 2, 5];
        value.with_read(|data| assert_eq!(comp, data));
    }
}
