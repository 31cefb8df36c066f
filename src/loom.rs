pub mod models {
    use core::array;

    use loom::sync::Arc;
    use loom::{model, thread};

    use crate::policy::{LockPolicy, Mode, ScopedGuard, SyncData};
    use crate::test::{get, inc, Int};
    use crate::GuardedValue;

    // TODO: Three or more threads make most models run for too long. It would
    // be nice to cover a writer racing two readers on the same value.
    const WRITERS: usize = 2;

    /// Tries to increment a guarded integer, without blocking.
    fn try_inc<P: LockPolicy>(value: &Arc<GuardedValue<Int, P>>) {
        if let Some(_guard) = ScopedGuard::try_acquire(value.policy(), Mode::Write) {
            // SAFETY: The guard holds exclusive access.
            unsafe { value.data_with_mut(|data| *data += 1) };
        }
    }

    /// Get a copy of the guarded integer, converting it to usize.
    ///
    /// Panics if the cast fails.
    fn get_unwrap<P: LockPolicy>(value: &Arc<GuardedValue<Int, P>>) -> usize {
        get(value).try_into().unwrap()
    }

    /// Evaluates that concurrent `with_write` calls will serialize all
    /// mutations against the guarded data, therefore no data races.
    pub fn write_join<P: LockPolicy + SyncData<Int> + Send + Sync + 'static>() {
        model(|| {
            const RUNS: usize = WRITERS;
            let value = Arc::new(GuardedValue::<Int, P>::new(0));
            let handles: [_; RUNS] = array::from_fn(|_| {
                let value = Arc::clone(&value);
                thread::spawn(move || inc(&value))
            });
            for handle in handles {
                handle.join().unwrap();
            }
            assert_eq!(RUNS, get_unwrap(&value));
        });
    }

    /// Evaluates that concurrent blocking and non-blocking acquisitions will
    /// serialize all mutations against the guarded data.
    pub fn mixed_join<P: LockPolicy + SyncData<Int> + Send + Sync + 'static>() {
        model(|| {
            const RUNS: usize = WRITERS;
            let value = Arc::new(GuardedValue::<Int, P>::new(0));
            let handles: [_; RUNS] = array::from_fn(|run| {
                let value = Arc::clone(&value);
                let f = if run % 2 == 0 { inc::<P> } else { try_inc::<P> };
                thread::spawn(move || f(&value))
            });
            for handle in handles {
                handle.join().unwrap();
            }
            assert!((1..=RUNS).contains(&get_unwrap(&value)));
        });
    }

    /// Evaluates that a reader never observes a half-applied write.
    pub fn read_write_join<P: LockPolicy + SyncData<(Int, Int)> + Send + Sync + 'static>() {
        model(|| {
            let value = Arc::new(GuardedValue::<(Int, Int), P>::new((0, 0)));
            let c_value = Arc::clone(&value);
            let writer = thread::spawn(move || {
                c_value.with_write(|pair| {
                    pair.0 += 1;
                    pair.1 += 1;
                });
            });
            let (a, b) = value.with_read(|pair| *pair);
            assert_eq!(a, b);
            writer.join().unwrap();
            assert_eq!(value.with_read(|pair| *pair), (1, 1));
        });
    }
}
