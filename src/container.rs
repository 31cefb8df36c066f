use core::fmt;
use std::collections::VecDeque;

use crate::error::{Error, Result};
use crate::policy::{Exclusive, LockPolicy};
use crate::GuardedValue;

/// The order in which a [`SafeContainer`] hands its elements back.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Discipline {
    /// Last in, first out: the container behaves as a stack.
    #[default]
    Lifo,
    /// First in, first out: the container behaves as a queue.
    Fifo,
}

/// A stack, or queue, that many threads may push to and pop from.
///
/// Elements are kept in a sequence guarded by the `P` policy. The sequence
/// itself is never lent out: reads return owned copies and removals are
/// single critical sections that check for emptiness and take the element
/// at once. There is no window between "is it empty?" and "take one" for
/// another thread to slip into.
///
/// The container is a stack by default. Pass [`Discipline::Fifo`] to
/// [`with_discipline`] to get a queue instead.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::thread;
///
/// use guardlock::{Error, SafeContainer};
///
/// let stack = Arc::new(SafeContainer::<i32>::new());
/// let c_stack = Arc::clone(&stack);
/// thread::spawn(move || (0..3).for_each(|n| c_stack.push(n)))
///     .join()
///     .expect("thread::spawn failed");
///
/// assert_eq!(stack.try_pop(), Some(2));
/// assert_eq!(stack.snapshot(), vec![0, 1]);
/// stack.clear();
/// assert!(matches!(stack.pop(), Err(Error::EmptyContainer)));
/// ```
///
/// [`with_discipline`]: SafeContainer::with_discipline
pub struct SafeContainer<T, P = Exclusive> {
    items: GuardedValue<VecDeque<T>, P>,
    discipline: Discipline,
}

impl<T, P: LockPolicy> SafeContainer<T, P> {
    /// Creates an empty container with the default [`Discipline::Lifo`].
    ///
    /// # Examples
    ///
    /// ```
    /// use guardlock::SafeContainer;
    ///
    /// let stack = SafeContainer::<String>::new();
    /// assert!(stack.is_empty());
    /// ```
    #[must_use]
    pub fn new() -> Self {
        Self::with_discipline(Discipline::default())
    }

    /// Creates an empty container handing elements back per `discipline`.
    ///
    /// # Examples
    ///
    /// ```
    /// use guardlock::{Discipline, SafeContainer};
    ///
    /// let queue = SafeContainer::<u8>::with_discipline(Discipline::Fifo);
    /// queue.push(1);
    /// queue.push(2);
    /// assert_eq!(queue.try_pop(), Some(1));
    /// ```
    #[must_use]
    pub fn with_discipline(discipline: Discipline) -> Self {
        Self { items: GuardedValue::new(VecDeque::new()), discipline }
    }

    /// Returns the discipline this container was created with.
    pub const fn discipline(&self) -> Discipline {
        self.discipline
    }

    /// Appends an element. Never fails.
    pub fn push(&self, value: T) {
        self.items.with_write(|items| items.push_back(value));
    }

    /// Removes and returns the next element, or [`None`] if the container is
    /// empty.
    pub fn try_pop(&self) -> Option<T> {
        let discipline = self.discipline;
        self.items.with_write(|items| take(items, discipline))
    }

    /// Removes and returns the next element.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyContainer`] if there is no element to remove.
    /// The policy is already released when the error is returned.
    pub fn pop(&self) -> Result<T> {
        self.try_pop().ok_or(Error::EmptyContainer)
    }

    /// Returns the number of elements at the time of the call.
    pub fn len(&self) -> usize {
        self.items.with_read(VecDeque::len)
    }

    /// Returns `true` if the container held no elements at the time of the
    /// call.
    pub fn is_empty(&self) -> bool {
        self.items.with_read(VecDeque::is_empty)
    }

    /// Removes every element.
    pub fn clear(&self) {
        self.items.with_write(VecDeque::clear);
    }

    /// Removes every element at once, returning them in the order they would
    /// have been popped.
    pub fn drain(&self) -> Vec<T> {
        let items = self.items.with_write(core::mem::take);
        match self.discipline {
            Discipline::Lifo => items.into_iter().rev().collect(),
            Discipline::Fifo => items.into(),
        }
    }
}

impl<T: Clone, P: LockPolicy> SafeContainer<T, P> {
    /// Returns an independent copy of every element, oldest first.
    ///
    /// Changing the returned vector has no effect on the container.
    pub fn snapshot(&self) -> Vec<T> {
        self.items.with_read(|items| items.iter().cloned().collect())
    }
}

/// Takes the next element of `items` per `discipline`.
fn take<T>(items: &mut VecDeque<T>, discipline: Discipline) -> Option<T> {
    match discipline {
        Discipline::Lifo => items.pop_back(),
        Discipline::Fifo => items.pop_front(),
    }
}

impl<T, P: LockPolicy> Default for SafeContainer<T, P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, P: LockPolicy> Extend<T> for SafeContainer<T, P> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        self.items.with_mut(|items| items.extend(iter));
    }
}

impl<T, P: LockPolicy> FromIterator<T> for SafeContainer<T, P> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let items = iter.into_iter().collect();
        Self { items: GuardedValue::new(items), discipline: Discipline::default() }
    }
}

impl<T: fmt::Debug, P: LockPolicy> fmt::Debug for SafeContainer<T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SafeContainer")
            .field("discipline", &self.discipline)
            .field("items", &self.items)
            .finish()
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use std::sync::Arc;
    use std::thread;

    use super::Discipline;
    use crate::error::Error;
    use crate::yields::{SafeContainer, SharedReadExclusiveWrite};

    type SharedContainer<T> = crate::SafeContainer<T, SharedReadExclusiveWrite>;

    #[test]
    fn lifo_by_default() {
        let stack = SafeContainer::new();
        assert_eq!(stack.discipline(), Discipline::Lifo);
        (1..=3).for_each(|n| stack.push(n));
        assert_eq!(stack.try_pop(), Some(3));
        assert_eq!(stack.pop().unwrap(), 2);
        assert_eq!(stack.len(), 1);
    }

    #[test]
    fn fifo_discipline() {
        let queue = SharedContainer::with_discipline(Discipline::Fifo);
        (1..=3).for_each(|n| queue.push(n));
        assert_eq!(queue.try_pop(), Some(1));
        assert_eq!(queue.drain(), vec![2, 3]);
        assert!(queue.is_empty());
    }

    #[test]
    fn pop_on_empty_container() {
        let stack = SafeContainer::<i32>::new();
        assert!(matches!(stack.pop(), Err(Error::EmptyContainer)));
        assert_eq!(stack.try_pop(), None);
        // The failed pop released the policy.
        stack.push(1);
        assert_eq!(stack.pop().unwrap(), 1);
    }

    #[test]
    fn snapshot_is_oldest_first_and_independent() {
        let stack: SafeContainer<String> = ["a", "b"].into_iter().map(String::from).collect();
        let mut first = stack.snapshot();
        assert_eq!(first, ["a", "b"]);
        first.push(String::from("c"));
        first[0].push('!');
        assert_eq!(stack.snapshot(), ["a", "b"]);
        assert_eq!(stack.try_pop().as_deref(), Some("b"));
    }

    #[test]
    fn drain_follows_pop_order() {
        let mut stack = SafeContainer::new();
        stack.extend([1, 2, 3]);
        assert_eq!(stack.drain(), vec![3, 2, 1]);
        assert!(stack.drain().is_empty());
    }

    #[test]
    fn clear_removes_everything() {
        let stack: SafeContainer<_> = (0..10).collect();
        stack.clear();
        assert!(stack.is_empty());
    }

    #[test]
    fn debug_lists_items() {
        let stack: SafeContainer<_> = (0..2).collect();
        assert_eq!(
            format!("{stack:?}"),
            "SafeContainer { discipline: Lifo, items: GuardedValue { data: [0, 1] } }"
        );
    }

    #[test]
    fn concurrent_producers_and_consumers() {
        const PRODUCERS: usize = 3;
        const ITEMS: usize = 1000;
        let container = Arc::new(SharedContainer::<usize>::new());
        let producers: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let container = Arc::clone(&container);
                thread::spawn(move || (0..ITEMS).for_each(|i| container.push(p * ITEMS + i)))
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }
        let consumers: Vec<_> = (0..PRODUCERS)
            .map(|_| {
                let container = Arc::clone(&container);
                thread::spawn(move || std::iter::from_fn(|| container.try_pop()).collect::<Vec<_>>())
            })
            .collect();
        let mut all: Vec<_> = consumers.into_iter().flat_map(|c| c.join().unwrap()).collect();
        all.sort_unstable();
        assert_eq!(all, (0..PRODUCERS * ITEMS).collect::<Vec<_>>());
    }
}

#[cfg(all(loom, test))]
mod test {
    use loom::sync::Arc;
    use loom::{model, thread};

    use crate::yields::SafeContainer;

    #[test]
    fn try_pop_never_duplicates() {
        model(|| {
            let container = Arc::new(SafeContainer::new());
            container.push(1);
            let c_container = Arc::clone(&container);
            let popper = thread::spawn(move || c_container.try_pop());
            let here = container.try_pop();
            let there = popper.join().unwrap();
            // Exactly one of the two racing pops gets the only element.
            assert_eq!(here.xor(there), Some(1));
        });
    }
}
