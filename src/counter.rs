use core::fmt;

use crate::GuardedValue;

/// A signed counter shared between threads.
///
/// Every operation is a single exclusive critical section over the count, so
/// concurrent increments are never lost, and [`increment_and_get`] observes
/// exactly the value its own increment produced.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::thread;
///
/// use guardlock::SafeCounter;
///
/// let counter = Arc::new(SafeCounter::new());
/// let handles: Vec<_> = (0..2)
///     .map(|_| {
///         let counter = Arc::clone(&counter);
///         thread::spawn(move || {
///             for _ in 0..10_000 {
///                 counter.increment();
///             }
///         })
///     })
///     .collect();
/// for handle in handles {
///     handle.join().unwrap();
/// }
/// assert_eq!(counter.get(), 20_000);
/// ```
///
/// [`increment_and_get`]: SafeCounter::increment_and_get
#[derive(Default)]
pub struct SafeCounter {
    count: GuardedValue<i64>,
}

impl SafeCounter {
    /// Creates a counter starting at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// Creates a counter starting at `count`.
    #[must_use]
    pub fn starting_at(count: i64) -> Self {
        Self { count: GuardedValue::<_>::new(count) }
    }

    /// Adds one to the count.
    pub fn increment(&self) {
        self.count.with_write(|count| *count += 1);
    }

    /// Subtracts one from the count.
    pub fn decrement(&self) {
        self.count.with_write(|count| *count -= 1);
    }

    /// Adds one to the count and returns the new value, atomically.
    pub fn increment_and_get(&self) -> i64 {
        self.count.with_write(|count| {
            *count += 1;
            *count
        })
    }

    /// Returns the current count.
    ///
    /// Other threads may change the count as soon as this returns.
    pub fn get(&self) -> i64 {
        self.count.with_read(|count| *count)
    }
}

impl fmt::Debug for SafeCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SafeCounter").field("count", &self.count).finish()
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    use super::SafeCounter;

    #[test]
    fn increments_and_decrements() {
        let counter = SafeCounter::new();
        counter.increment();
        counter.increment();
        counter.decrement();
        assert_eq!(counter.get(), 1);
        assert_eq!(SafeCounter::starting_at(-3).get(), -3);
    }

    #[test]
    fn increment_and_get_values_are_unique() {
        const THREADS: usize = 4;
        const ITERS: usize = 1000;
        let counter = Arc::new(SafeCounter::default());
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    (0..ITERS).map(|_| counter.increment_and_get()).collect::<Vec<_>>()
                })
            })
            .collect();
        let mut seen = HashSet::new();
        for handle in handles {
            for value in handle.join().unwrap() {
                assert!(seen.insert(value), "{value} was observed twice");
            }
        }
        let total = (THREADS * ITERS) as i64;
        assert_eq!(seen.len() as i64, total);
        assert_eq!(counter.get(), total);
    }

    #[test]
    fn debug_shows_count() {
        let counter = SafeCounter::starting_at(5);
        assert_eq!(format!("{counter:?}"), "SafeCounter { count: GuardedValue { data: 5 } }");
    }
}
