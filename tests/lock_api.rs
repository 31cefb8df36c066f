// Test suite from the Rust's Mutex and RwLock implementations with minor
// modifications since the API is not compatible with this crate
// implementation and some new tests as well.
//
// Copyright 2014 The Rust Project Developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

#![cfg(feature = "lock_api")]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::channel;
use std::sync::{Arc, Barrier};
use std::thread;

use guardlock::lock_api::yields::{Mutex, RwLock};

#[derive(Eq, PartialEq, Debug)]
struct NonCopy(i32);

#[test]
fn smoke() {
    let m = Mutex::new(());
    drop(m.lock());
    drop(m.lock());
}

#[test]
fn lots_and_lots() {
    static LOCK: Mutex<u32> = Mutex::new(0);

    const ITERS: u32 = 1000;
    const CONCURRENCY: u32 = 3;

    fn inc() {
        for _ in 0..ITERS {
            let mut g = LOCK.lock();
            *g += 1;
        }
    }

    let (tx, rx) = channel();
    for _ in 0..CONCURRENCY {
        let tx2 = tx.clone();
        thread::spawn(move || {
            inc();
            tx2.send(()).unwrap();
        });
        let tx2 = tx.clone();
        thread::spawn(move || {
            inc();
            tx2.send(()).unwrap();
        });
    }

    drop(tx);
    for _ in 0..2 * CONCURRENCY {
        rx.recv().unwrap();
    }
    assert_eq!(*LOCK.lock(), ITERS * CONCURRENCY * 2);
}

#[test]
fn try_lock() {
    let m = Mutex::new(());
    *m.try_lock().unwrap() = ();
}

#[test]
fn try_lock_while_held_by_self_fails() {
    let m = Mutex::new(1);
    let _guard = m.lock();
    assert!(m.try_lock().is_none());
    assert!(m.is_locked());
}

#[test]
#[should_panic(expected = "reentrant Write acquisition")]
fn reentrant_lock_panics() {
    let m = Mutex::new(1);
    let _first = m.lock();
    let _second = m.lock();
}

#[test]
fn leaked_guard_does_not_outlive_its_mutex() {
    for _ in 0..8 {
        let m = Mutex::new(0);
        core::mem::forget(m.lock());
    }
    // Fresh locks may reuse the addresses of the leaked ones.
    for _ in 0..8 {
        let m = Mutex::new(0);
        *m.lock() += 1;
        let l = RwLock::new(0);
        *l.write() += 1;
    }
}

#[test]
fn test_into_inner() {
    let m = Mutex::new(NonCopy(10));
    assert_eq!(m.into_inner(), NonCopy(10));
}

#[test]
fn test_into_inner_drop() {
    struct Foo(Arc<AtomicUsize>);
    impl Drop for Foo {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }
    let num_drops = Arc::new(AtomicUsize::new(0));
    let m = Mutex::new(Foo(num_drops.clone()));
    assert_eq!(num_drops.load(Ordering::SeqCst), 0);
    {
        let _inner = m.into_inner();
        assert_eq!(num_drops.load(Ordering::SeqCst), 0);
    }
    assert_eq!(num_drops.load(Ordering::SeqCst), 1);
}

#[test]
fn test_get_mut() {
    let mut m = Mutex::new(NonCopy(10));
    *m.get_mut() = NonCopy(20);
    assert_eq!(m.into_inner(), NonCopy(20));
}

#[test]
fn test_lock_arc_nested() {
    // Tests nested locks and access
    // to underlying data.
    let arc = Arc::new(Mutex::new(1));
    let arc2 = Arc::new(Mutex::new(arc));
    let (tx, rx) = channel();
    let _t = thread::spawn(move || {
        let lock = arc2.lock();
        let lock2 = lock.lock();
        assert_eq!(*lock2, 1);
        tx.send(()).unwrap();
    });
    rx.recv().unwrap();
}

#[test]
fn test_lock_arc_access_in_unwind() {
    let arc = Arc::new(Mutex::new(1));
    let arc2 = arc.clone();
    let _ = thread::spawn(move || {
        struct Unwinder {
            i: Arc<Mutex<i32>>,
        }
        impl Drop for Unwinder {
            fn drop(&mut self) {
                *self.i.lock() += 1;
            }
        }
        let _u = Unwinder { i: arc2 };
        panic!();
    })
    .join();
    let lock = arc.lock();
    assert_eq!(*lock, 2);
}

#[test]
fn test_lock_unsized() {
    let lock: &Mutex<[i32]> = &Mutex::new([1, 2, 3]);
    {
        let b = &mut *lock.lock();
        b[0] = 4;
        b[2] = 5;
    }
    let comp: &[i32] = &[4, 2, 5];
    assert_eq!(&*lock.lock(), comp);
}

#[test]
fn rwlock_smoke() {
    let l = RwLock::new(());
    drop(l.read());
    drop(l.write());
    drop((l.read(), l.read()));
    drop(l.write());
}

#[test]
fn rwlock_readers_are_concurrent() {
    const READERS: usize = 3;
    let lock = Arc::new(RwLock::new(7));
    let barrier = Arc::new(Barrier::new(READERS));
    let handles: Vec<_> = (0..READERS)
        .map(|_| {
            let (lock, barrier) = (Arc::clone(&lock), Arc::clone(&barrier));
            thread::spawn(move || {
                let guard = lock.read();
                barrier.wait();
                *guard
            })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), 7);
    }
    assert!(!lock.is_locked());
}

#[test]
fn rwlock_writer_excludes_readers() {
    let lock = RwLock::new(0);
    let guard = lock.write();
    assert!(lock.is_locked_exclusive());
    thread::scope(|s| {
        s.spawn(|| assert!(lock.try_read().is_none()));
    });
    drop(guard);
    assert!(lock.try_read().is_some());
}

#[test]
fn rwlock_lots_and_lots() {
    const ITERS: usize = 1000;
    const WRITERS: usize = 2;
    let lock = Arc::new(RwLock::new(0));
    let handles: Vec<_> = (0..2 * WRITERS)
        .map(|index| {
            let lock = Arc::clone(&lock);
            thread::spawn(move || {
                for _ in 0..ITERS {
                    if index % 2 == 0 {
                        *lock.write() += 1;
                    } else {
                        assert!(*lock.read() <= ITERS * WRITERS);
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(*lock.read(), ITERS * WRITERS);
}

#[test]
#[should_panic(expected = "reentrant Write acquisition")]
fn rwlock_upgrade_in_place_panics() {
    let lock = RwLock::new(0);
    let _read = lock.read();
    let _write = lock.write();
}
