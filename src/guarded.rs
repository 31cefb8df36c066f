use core::fmt;

use crate::cfg::cell::{UnsafeCell, UnsafeCellWith};
use crate::policy::{Exclusive, LockPolicy, Mode, ScopedGuard, SyncData};

/// A value that can only be reached while its locking policy is held.
///
/// `GuardedValue` owns exactly one `T` and one [`LockPolicy`] `P`. The data is
/// never handed out by reference past a lock scope: [`with_read`] and
/// [`with_write`] acquire the policy, lend the data to a closure and release
/// the policy once the closure returns, unwinds or produces an error. Only
/// owned results, copies or derived values, can leave the closure.
///
/// Sharing a `GuardedValue` between threads is done with an [`Arc`], or with
/// scoped threads, never through global state. Under the [`Exclusive`] and
/// [`OrderedMultiLock`] policies this only requires `T: Send`, like a
/// [`Mutex`]. Under [`SharedReadExclusiveWrite`], readers share the data, so
/// `T: Sync` is required as well, like a [`RwLock`]:
///
/// ```compile_fail
/// use std::cell::Cell;
/// use std::sync::Arc;
/// use std::thread;
///
/// use guardlock::policy::SharedReadExclusiveWrite;
/// use guardlock::GuardedValue;
///
/// let value = Arc::new(GuardedValue::<_, SharedReadExclusiveWrite>::new(Cell::new(0)));
/// thread::spawn(move || value.with_read(|cell| cell.set(1)));
/// ```
///
/// Critical sections do not nest across values. Acquiring a value inside the
/// closure given for another value panics with a [`ContractViolation`], since
/// two threads doing so in opposite orders deadlock. Use [`multi::lock_all`]
/// to work on several values at once.
///
/// The policy is part of the type. Naming any generic argument at construction
/// selects the default [`Exclusive`] policy for `P`, as in
/// `GuardedValue::<_>::new(value)`, while `GuardedValue::<_, P>::new(value)`
/// selects `P`. The [`spins`], [`yields`] and [`loops`] modules also provide
/// aliases with the policy fixed.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::thread;
/// use std::sync::mpsc::channel;
///
/// use guardlock::GuardedValue;
///
/// const N: usize = 10;
///
/// // Spawn a few threads to increment a shared variable (non-atomically), and
/// // let the main thread know once all increments are done.
/// let data = Arc::new(GuardedValue::<_>::new(0));
///
/// let (tx, rx) = channel();
/// for _ in 0..N {
///     let (data, tx) = (Arc::clone(&data), tx.clone());
///     thread::spawn(move || {
///         // The shared state can only be accessed inside the closure, while
///         // this thread is the only one holding the policy.
///         let count = data.with_write(|count| {
///             *count += 1;
///             *count
///         });
///         if count == N {
///             tx.send(()).unwrap();
///         }
///         // the policy was released when `with_write` returned.
///     });
/// }
///
/// rx.recv().unwrap();
/// ```
///
/// [`with_read`]: GuardedValue::with_read
/// [`with_write`]: GuardedValue::with_write
/// [`Arc`]: std::sync::Arc
/// [`Mutex`]: std::sync::Mutex
/// [`RwLock`]: std::sync::RwLock
/// [`OrderedMultiLock`]: crate::policy::OrderedMultiLock
/// [`SharedReadExclusiveWrite`]: crate::policy::SharedReadExclusiveWrite
/// [`ContractViolation`]: crate::ContractViolation
/// [`multi::lock_all`]: crate::multi::lock_all
/// [`spins`]: crate::spins
/// [`yields`]: crate::yields
/// [`loops`]: crate::loops
pub struct GuardedValue<T: ?Sized, P = Exclusive> {
    policy: P,
    data: UnsafeCell<T>,
}

// Exclusive policies need the same bounds as `std::sync::Mutex`, policies with
// concurrent readers the same as `std::sync::RwLock`.
unsafe impl<T: ?Sized + Send, P: Send> Send for GuardedValue<T, P> {}
unsafe impl<T: ?Sized + Send, P: Sync + SyncData<T>> Sync for GuardedValue<T, P> {}

impl<T, P: LockPolicy> GuardedValue<T, P> {
    /// Creates a new guarded value with its policy released.
    ///
    /// # Examples
    ///
    /// ```
    /// use guardlock::GuardedValue;
    ///
    /// let value = GuardedValue::<_>::new(0);
    /// ```
    #[inline]
    pub fn new(value: T) -> Self {
        Self { policy: P::new(), data: UnsafeCell::new(value) }
    }
}

impl<T, P> GuardedValue<T, P> {
    /// Consumes this guarded value, returning the underlying data.
    ///
    /// # Examples
    ///
    /// ```
    /// use guardlock::GuardedValue;
    ///
    /// let value = GuardedValue::<_>::new(0);
    /// assert_eq!(value.into_inner(), 0);
    /// ```
    #[inline]
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized, P: LockPolicy> GuardedValue<T, P> {
    /// Acquires shared access and then runs the closure against the data.
    ///
    /// Blocks the current thread until the policy grants [`Mode::Read`]. The
    /// closure's return value is handed back to the caller after the policy
    /// is released, which is also how errors raised inside the closure
    /// propagate:
    ///
    /// ```
    /// use guardlock::GuardedValue;
    ///
    /// let value = GuardedValue::<_>::new(String::from("42"));
    /// let parsed: Result<u32, _> = value.with_read(|text| text.parse());
    /// assert_eq!(parsed, Ok(42));
    /// assert!(!value.is_locked());
    /// ```
    ///
    /// Borrows of the data cannot escape the given closure.
    ///
    /// ```compile_fail
    /// use guardlock::GuardedValue;
    ///
    /// let value = GuardedValue::<_>::new(1);
    /// let data = value.with_read(|data| data);
    /// ```
    ///
    /// # Panics
    ///
    /// Panics with a [`ContractViolation`] if the current thread already holds
    /// conflicting access to this value, or if it is running inside the
    /// critical section of another value.
    ///
    /// [`ContractViolation`]: crate::ContractViolation
    #[track_caller]
    pub fn with_read<F, Ret>(&self, f: F) -> Ret
    where
        F: FnOnce(&T) -> Ret,
    {
        let _guard = ScopedGuard::acquire(&self.policy, Mode::Read);
        // SAFETY: The policy grants shared access, no writer holds it.
        unsafe { self.data.with_unchecked(f) }
    }

    /// Acquires exclusive access and then runs the closure against the data.
    ///
    /// Blocks the current thread until the policy grants [`Mode::Write`]. Upon
    /// acquisition, the closure is executed against a mutable reference to the
    /// data. The policy is released once the closure returns or unwinds.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::Arc;
    /// use std::thread;
    ///
    /// use guardlock::GuardedValue;
    ///
    /// let value = Arc::new(GuardedValue::<_>::new(0));
    /// let c_value = Arc::clone(&value);
    ///
    /// thread::spawn(move || {
    ///     c_value.with_write(|data| *data = 10);
    /// })
    /// .join().expect("thread::spawn failed");
    ///
    /// assert_eq!(value.with_read(|data| *data), 10);
    /// ```
    ///
    /// Borrows of the data cannot escape the given closure.
    ///
    /// ```compile_fail
    /// use guardlock::GuardedValue;
    ///
    /// let value = GuardedValue::<_>::new(1);
    /// let data = value.with_write(|data| &mut *data);
    /// ```
    ///
    /// Acquiring another value from within the closure is rejected, see
    /// [`multi::lock_all`] instead:
    ///
    /// ```should_panic
    /// use guardlock::GuardedValue;
    ///
    /// let (a, b) = (GuardedValue::<_>::new(1), GuardedValue::<_>::new(2));
    /// a.with_write(|a| b.with_write(|b| std::mem::swap(a, b)));
    /// ```
    ///
    /// # Panics
    ///
    /// Panics with a [`ContractViolation`] if the current thread already holds
    /// any access to this value, or if it is running inside the critical
    /// section of another value.
    ///
    /// [`ContractViolation`]: crate::ContractViolation
    /// [`multi::lock_all`]: crate::multi::lock_all
    #[track_caller]
    pub fn with_write<F, Ret>(&self, f: F) -> Ret
    where
        F: FnOnce(&mut T) -> Ret,
    {
        let _guard = ScopedGuard::acquire(&self.policy, Mode::Write);
        // SAFETY: The policy grants exclusive access.
        unsafe { self.data.with_mut_unchecked(f) }
    }

    /// Returns `true` if the policy of this value is currently held.
    ///
    /// This method does not provide any synchronization guarantees, so its only
    /// useful as a heuristic, and so must be considered not up to date.
    ///
    /// # Example
    ///
    /// ```
    /// use guardlock::GuardedValue;
    ///
    /// let value = GuardedValue::<_>::new(0);
    /// value.with_write(|_| assert!(true));
    /// assert_eq!(value.is_locked(), false);
    /// ```
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.policy.is_locked()
    }

    /// Returns a reference to this value's policy.
    pub(crate) const fn policy(&self) -> &P {
        &self.policy
    }

    /// Runs `f` against a shared reference to the data.
    ///
    /// # Safety
    ///
    /// Caller must hold at least shared access on `self.policy()`.
    pub(crate) unsafe fn data_with<F, Ret>(&self, f: F) -> Ret
    where
        F: FnOnce(&T) -> Ret,
    {
        // SAFETY: Caller guarantees shared access is held.
        unsafe { self.data.with_unchecked(f) }
    }

    /// Runs `f` against a mutable reference to the data.
    ///
    /// # Safety
    ///
    /// Caller must hold exclusive access on `self.policy()`.
    pub(crate) unsafe fn data_with_mut<F, Ret>(&self, f: F) -> Ret
    where
        F: FnOnce(&mut T) -> Ret,
    {
        // SAFETY: Caller guarantees exclusive access is held.
        unsafe { self.data.with_mut_unchecked(f) }
    }
}

impl<T: ?Sized, P> GuardedValue<T, P> {
    /// Returns a mutable reference to the underlying data.
    ///
    /// Since this call borrows the `GuardedValue` mutably, no actual locking
    /// needs to take place - the mutable borrow statically guarantees no
    /// acquisitions exist.
    ///
    /// # Examples
    ///
    /// ```
    /// use guardlock::GuardedValue;
    ///
    /// let mut value = GuardedValue::<_>::new(0);
    /// *value.get_mut() = 10;
    /// assert_eq!(value.with_read(|data| *data), 10);
    /// ```
    #[cfg(not(all(loom, test)))]
    #[inline]
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    /// Runs `f` against the data through the exclusive borrow of `self`,
    /// without acquiring the policy.
    pub(crate) fn with_mut<F, Ret>(&mut self, f: F) -> Ret
    where
        F: FnOnce(&mut T) -> Ret,
    {
        // SAFETY: The mutable borrow statically guarantees no acquisitions exist.
        unsafe { self.data.with_mut_unchecked(f) }
    }
}

impl<T: Default, P: LockPolicy> Default for GuardedValue<T, P> {
    /// Creates a `GuardedValue<T, P>`, with the `Default` value for `T`.
    fn default() -> Self {
        Self::new(Default::default())
    }
}

impl<T, P: LockPolicy> From<T> for GuardedValue<T, P> {
    /// Creates a `GuardedValue<T, P>` from a instance of `T`.
    fn from(data: T) -> Self {
        Self::new(data)
    }
}

impl<T: ?Sized + fmt::Debug, P: LockPolicy> fmt::Debug for GuardedValue<T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("GuardedValue");
        match ScopedGuard::try_acquire(&self.policy, Mode::Read) {
            // SAFETY: The guard holds shared access until the end of this arm.
            Some(_guard) => unsafe {
                self.data.with_unchecked(|data| {
                    d.field("data", &data);
                });
            },
            None => {
                d.field("data", &format_args!("<locked>"));
            }
        }
        d.finish()
    }
}
