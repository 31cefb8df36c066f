//! Execution context identity and the per-thread record of held tokens.

use core::cell::RefCell;
use core::fmt;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};

use crate::cfg::thread::thread_local;
use crate::error::ContractViolation;
use crate::policy::Mode;

/// A stable identifier for the calling execution context (thread).
///
/// Identifiers are assigned on first use, in increasing order, and never
/// reused within a process. A thread keeps the same identifier for its whole
/// lifetime. `ContextId(0)` is reserved for contexts whose thread-local storage
/// has already been torn down.
///
/// # Examples
///
/// ```
/// use std::thread;
/// use guardlock::ContextId;
///
/// let here = ContextId::current();
/// assert_eq!(here, ContextId::current());
///
/// let there = thread::spawn(ContextId::current).join().unwrap();
/// assert_ne!(here, there);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContextId(u64);

impl ContextId {
    const UNKNOWN: Self = Self(0);

    /// Returns the identifier of the calling context.
    #[must_use]
    pub fn current() -> Self {
        CONTEXT.try_with(|context| context.id).unwrap_or(Self::UNKNOWN)
    }

    /// Returns the raw numeric value of this identifier.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Relaxed))
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

/// A token currently held by this context: the policy address and its mode.
#[derive(Debug, Clone, Copy)]
struct Held {
    addr: usize,
    mode: Mode,
}

struct Context {
    id: ContextId,
    held: RefCell<Vec<Held>>,
    // Policy addresses of the critical sections this context is inside of.
    scopes: RefCell<Vec<usize>>,
}

thread_local! {
    static CONTEXT: Context = Context {
        id: ContextId::next(),
        held: RefCell::new(Vec::new()),
        scopes: RefCell::new(Vec::new()),
    };
}

/// Returns the first token conflicting with a `mode` request on `addr`.
///
/// Shared requests only conflict with a held exclusive token, exclusive
/// requests conflict with anything held.
fn conflict(held: &[Held], addr: usize, mode: Mode) -> Option<Mode> {
    held.iter()
        .filter(|held| held.addr == addr)
        .find(|held| mode == Mode::Write || held.mode == Mode::Write)
        .map(|held| held.mode)
}

/// Returns `true` if a `mode` request on `addr` would deadlock against a token
/// already held by the calling context.
pub(crate) fn would_reenter(addr: usize, mode: Mode) -> bool {
    CONTEXT
        .try_with(|context| conflict(&context.held.borrow(), addr, mode).is_some())
        .unwrap_or(false)
}

/// Raises a [`ContractViolation::Reentrant`] if a blocking `mode` request on
/// `addr` would deadlock against the calling context itself.
#[track_caller]
pub(crate) fn check_reentry(addr: usize, mode: Mode) {
    let found = CONTEXT
        .try_with(|context| conflict(&context.held.borrow(), addr, mode).map(|held| (context.id, held)))
        .ok()
        .flatten();
    if let Some((context, held)) = found {
        ContractViolation::Reentrant { context, requested: mode, held }.raise();
    }
}

/// Records that the calling context now holds `mode` access on `addr`.
pub(crate) fn enter(addr: usize, mode: Mode) {
    let _ = CONTEXT.try_with(|context| context.held.borrow_mut().push(Held { addr, mode }));
}

/// Forgets every token recorded for `addr` by the calling context.
///
/// Called when the policy at `addr` is dropped, so that a later policy living
/// at the same address starts with a clean record.
pub(crate) fn forget(addr: usize) {
    let _ = CONTEXT.try_with(|context| context.held.borrow_mut().retain(|held| held.addr != addr));
}

/// The critical section of one or more values, as seen by the calling context.
///
/// Entering a scope while already inside the scope of some other value is a
/// nested acquisition of independent values, which can deadlock against a
/// thread nesting them in the opposite order.
pub(crate) struct Scope<const N: usize> {
    addrs: [usize; N],
}

impl<const N: usize> Scope<N> {
    /// Enters the critical section of the policies at `addrs`.
    ///
    /// Raises a [`ContractViolation::NestedAcquisition`] if the calling context
    /// is inside the scope of a policy not named by `addrs`. Scopes of the
    /// same policies are left to the reentrancy checks.
    #[track_caller]
    pub(crate) fn enter(addrs: [usize; N]) -> Self {
        let nested = CONTEXT
            .try_with(|context| {
                let mut scopes = context.scopes.borrow_mut();
                let nested = scopes.iter().any(|addr| !addrs.contains(addr));
                if !nested {
                    scopes.extend_from_slice(&addrs);
                }
                nested.then_some(context.id)
            })
            .ok()
            .flatten();
        if let Some(context) = nested {
            ContractViolation::NestedAcquisition { context }.raise();
        }
        Self { addrs }
    }
}

impl<const N: usize> Drop for Scope<N> {
    fn drop(&mut self) {
        let _ = CONTEXT.try_with(|context| {
            let mut scopes = context.scopes.borrow_mut();
            for addr in self.addrs {
                if let Some(index) = scopes.iter().rposition(|&scope| scope == addr) {
                    scopes.remove(index);
                }
            }
        });
    }
}

/// Forgets the most recent `mode` token recorded for `addr`, if any.
pub(crate) fn exit(addr: usize, mode: Mode) {
    let _ = CONTEXT.try_with(|context| {
        let mut held = context.held.borrow_mut();
        if let Some(index) = held.iter().rposition(|h| h.addr == addr && h.mode == mode) {
            held.swap_remove(index);
        }
    });
}

#[cfg(all(not(loom), test))]
mod test {
    use std::thread;

    use super::{enter, exit, forget, would_reenter, ContextId, Scope};
    use crate::policy::Mode::{Read, Write};

    #[test]
    fn ids_are_stable_and_distinct() {
        let here = ContextId::current();
        assert_eq!(here, ContextId::current());
        assert_ne!(here.as_u64(), 0);
        let there = thread::spawn(ContextId::current).join().unwrap();
        assert_ne!(here, there);
    }

    #[test]
    fn display_is_prefixed() {
        let id = ContextId::current();
        assert_eq!(id.to_string(), format!("ctx-{}", id.as_u64()));
    }

    #[test]
    fn shared_tokens_only_conflict_with_exclusive_requests() {
        let addr = 0x1000;
        enter(addr, Read);
        assert!(!would_reenter(addr, Read));
        assert!(would_reenter(addr, Write));
        exit(addr, Read);
        assert!(!would_reenter(addr, Write));
    }

    #[test]
    fn exclusive_tokens_conflict_with_everything() {
        let addr = 0x2000;
        enter(addr, Write);
        assert!(would_reenter(addr, Read));
        assert!(would_reenter(addr, Write));
        assert!(!would_reenter(addr + 1, Write));
        exit(addr, Write);
        assert!(!would_reenter(addr, Read));
    }

    #[test]
    fn records_are_per_thread() {
        let addr = 0x3000;
        enter(addr, Write);
        let other = thread::spawn(move || would_reenter(addr, Write)).join().unwrap();
        assert!(!other);
        exit(addr, Write);
    }

    #[test]
    fn forget_drops_every_record_of_an_address() {
        let addr = 0x4000;
        enter(addr, Read);
        enter(addr, Read);
        enter(addr + 1, Write);
        forget(addr);
        assert!(!would_reenter(addr, Write));
        assert!(would_reenter(addr + 1, Read));
        exit(addr + 1, Write);
    }

    #[test]
    fn scopes_of_the_same_addresses_nest() {
        let outer = Scope::enter([0x5000]);
        let inner = Scope::enter([0x5000]);
        let pair = Scope::enter([0x5000, 0x5001]);
        drop((pair, inner, outer));
        // Every scope was closed, so an unrelated one can be entered.
        let _other = Scope::enter([0x6000]);
    }

    #[test]
    #[should_panic(expected = "nested acquisition by ctx-")]
    fn scope_of_another_address_panics() {
        let _outer = Scope::enter([0x7000]);
        let _inner = Scope::enter([0x7001]);
    }
}
