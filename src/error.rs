use std::io;
use std::path::PathBuf;

use crate::context::ContextId;
use crate::policy::Mode;

/// A specialized [`Result`](std::result::Result) type for fallible operations
/// of this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Recoverable failures reported by containers and sinks.
///
/// Token release always happens before any of these errors reach the caller.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A strict `pop` was issued against a container with no elements.
    #[error("container is empty")]
    EmptyContainer,

    /// The backing resource of a sink could not be opened.
    #[error("resource `{}` is unavailable: {source}", path.display())]
    ResourceUnavailable {
        /// Location of the resource that failed to open.
        path: PathBuf,
        /// The underlying I/O failure.
        #[source]
        source: io::Error,
    },

    /// Flushing a sink's resource during teardown failed.
    #[error("sink teardown failed: {0}")]
    Io(#[from] io::Error),
}

/// Programming errors detected while acquiring a policy.
///
/// These are never returned. The crate emits a `tracing` error event and then
/// panics with the `Display` text of the violation, since retrying cannot
/// succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ContractViolation {
    /// The calling context asked for access it would deadlock on, because it
    /// already holds a conflicting token of the same policy instance.
    #[error("reentrant {requested:?} acquisition by {context}, which already holds {held:?} access")]
    Reentrant {
        /// The offending execution context.
        context: ContextId,
        /// The mode being requested.
        requested: Mode,
        /// The mode already held by `context`.
        held: Mode,
    },

    /// The calling context asked for a value while inside the critical section
    /// of another, independent value. Two threads nesting the same values in
    /// opposite orders deadlock; [`multi::lock_all`] acquires them together.
    ///
    /// [`multi::lock_all`]: crate::multi::lock_all
    #[error("nested acquisition by {context} while inside the critical section of another value, use `multi::lock_all` instead")]
    NestedAcquisition {
        /// The offending execution context.
        context: ContextId,
    },

    /// A combined acquisition named the same value more than once.
    #[error("combined acquisition by {context} names the same value more than once")]
    DuplicateInLockSet {
        /// The offending execution context.
        context: ContextId,
    },
}

impl ContractViolation {
    /// Reports this violation and unwinds the calling thread.
    #[cold]
    #[track_caller]
    pub(crate) fn raise(self) -> ! {
        tracing::error!(violation = %self, "lock contract violation");
        panic!("{self}")
    }
}
