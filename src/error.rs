//! Error taxonomy (`spec.md` §7). Only the conditions §7 marks as
//! surfacing to callers get a variant here. The ring manager's internal
//! submission backpressure (`BUSY` from `submit()`) and `INTERRUPTED`/
//! `TIMED_OUT` are handled entirely inside [`crate::ring`]/[`crate::poll`]
//! and never escape as a [`ReactorError`] — those are distinct from
//! [`ReactorError::Busy`], which is the caller-visible, recoverable
//! `close(L)`-precondition `BUSY` that §4.1 names. `BUG` conditions
//! (submission-queue exhaustion surviving a retry, `nfds == 0` with a
//! non-empty watcher queue) are treated as fatal invariant violations and
//! abort via `panic!`/`unreachable!`, matching the teacher's own use of
//! `assert!` for the same conditions in `linux-io-uring.c`.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReactorError {
    /// Allocation failure setting up the ring (`spec.md` §4.1 `init`).
    #[error("out of memory initializing the ring")]
    OutOfMemory,

    /// The running kernel doesn't support `io_uring`.
    #[error("io_uring is not available on this kernel: {0}")]
    PlatformUnavailable(#[source] std::io::Error),

    /// `io_check_fd` found the fd invalid, or an operation was called on
    /// an unknown/invalidated watcher.
    #[error("invalid operation: {0}")]
    Invalid(&'static str),

    /// `close(L)` was called while watchers are still registered
    /// (`spec.md` §4.1). Recoverable: the caller gets `L` back (see
    /// [`crate::Loop::close`]) and may retry once its watchers are torn
    /// down.
    #[error("loop_close called with watchers still registered")]
    Busy,

    /// An uncategorized kernel errno surfaced from `submit`/`enter` that
    /// isn't one of the recoverable conditions §7 names.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ReactorError>;
