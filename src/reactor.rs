//! Loop context (`spec.md` §4.1) and the crate's public surface: `Loop`,
//! `RunMode`, `ConfigFlags`, and the watcher lifecycle operations
//! (`io_init`/`io_start`/`io_stop`/`io_close`/`invalidate_fd`/
//! `io_check_fd`).

use std::os::unix::io::RawFd;

use bitflags::bitflags;
use tracing::{trace, warn};

use crate::clock::monotonic_time_ms;
use crate::error::{ReactorError, Result};
use crate::invalidate;
use crate::metrics::Metrics;
use crate::poll;
use crate::registry::Registry;
use crate::ring::{Ring, DEFAULT_ENTRIES};
use crate::watcher::{Callback, Interest, WatcherId};

bitflags! {
    /// Loop-wide configuration (`spec.md` §4.1, §4.7). Set once via
    /// [`Loop::configure`] before the first `run`; the engine reads
    /// these at the top of every poll step.
    #[derive(Default)]
    pub struct ConfigFlags: u32 {
        /// Block `SIGPROF` around the blocking wait (§4.7).
        const BLOCK_SIGPROF = 1 << 0;
        /// Enable idle-time accounting (§4.6).
        const IDLE_TIME      = 1 << 1;
    }
}

/// How far [`Loop::run`] should go before returning (`spec.md` §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Run until no watchers remain active.
    Default,
    /// Run a single poll step, blocking indefinitely for it.
    Once,
    /// Run a single poll step without blocking.
    NoWait,
}

/// The reactor core: one ring, one watcher registry, one clock. Not
/// `Sync` (it is never shared between threads), but nothing here
/// prevents constructing independent `Loop`s on independent threads
/// (`spec.md` §5).
pub struct Loop {
    pub(crate) ring: Ring,
    pub(crate) registry: Registry,
    pub(crate) config: ConfigFlags,
    pub(crate) time: u64,
    pub(crate) metrics: Metrics,
    pub(crate) signal_watcher: Option<WatcherId>,
}

impl Loop {
    /// `loop_init` (`spec.md` §4.1): allocates the ring and sets the
    /// initial `time` snapshot.
    pub fn init() -> Result<Loop> {
        Self::init_with_entries(DEFAULT_ENTRIES)
    }

    pub fn init_with_entries(entries: u32) -> Result<Loop> {
        let ring = Ring::new(entries)?;
        trace!(entries, "loop initialized");
        Ok(Loop {
            ring,
            registry: Registry::new(),
            config: ConfigFlags::empty(),
            time: monotonic_time_ms(),
            metrics: Metrics::default(),
            signal_watcher: None,
        })
    }

    /// `loop_close` (`spec.md` §4.1): tears down the ring. Fails with
    /// [`ReactorError::Busy`] if watchers are still registered, matching
    /// the teacher's own `uv_loop_close` contract that a loop with live
    /// handles can't be closed out from under them. On failure `self` is
    /// handed back to the caller rather than dropped, so the ring is
    /// never torn down out from under the still-registered watchers and
    /// the caller can finish stopping them and retry (`spec.md` §7:
    /// `BUSY` is "treated as retry later").
    pub fn close(self) -> std::result::Result<(), (Loop, ReactorError)> {
        if !self.registry.is_empty() {
            warn!("loop_close called with watchers still registered");
            return Err((self, ReactorError::Busy));
        }
        trace!("loop closed");
        Ok(())
    }

    /// `loop_configure` (`spec.md` §4.1, §4.7).
    pub fn configure(&mut self, flags: ConfigFlags) {
        self.config = flags;
    }

    /// `loop_time` (`spec.md` §3, §4.7): the cached millisecond
    /// `CLOCK_MONOTONIC` snapshot, refreshed at the top of every poll
    /// step and unconditionally after every wait.
    pub fn time(&self) -> u64 {
        self.time
    }

    pub fn idle_time_ns(&self) -> u64 {
        self.metrics.idle_time_ns()
    }

    /// `loop_run` (`spec.md` §4.4, §6): drives the poll engine according
    /// to `mode`. Returns whether watchers remain registered (i.e.
    /// whether another call would do anything).
    pub fn run(&mut self, mode: RunMode) -> bool {
        poll::run(self, mode)
    }

    /// `io_init` (`spec.md` §3 "Watcher (W)"): registers a new watcher,
    /// unarmed. Call [`Loop::io_start`] to begin polling it.
    pub fn io_init(&mut self, fd: RawFd, callback: Callback) -> WatcherId {
        self.registry.insert(fd, callback)
    }

    /// Registers `id` as the loop's signal-I/O watcher (`spec.md` §4.4
    /// step 8/10): its completions are always dispatched last among a
    /// batch, after every other watcher's callback has run.
    pub fn set_signal_watcher(&mut self, id: WatcherId) {
        self.signal_watcher = Some(id);
    }

    /// `io_start` (`spec.md` §4.2).
    pub fn io_start(&mut self, id: WatcherId, mask: Interest) -> Result<()> {
        self.registry.start(id, mask)
    }

    /// `io_stop` (`spec.md` §4.2).
    pub fn io_stop(&mut self, id: WatcherId, mask: Interest) -> Result<()> {
        self.registry.stop(id, mask)
    }

    /// `io_close` (`spec.md` §4.2).
    pub fn io_close(&mut self, id: WatcherId) -> Result<()> {
        self.registry.close(id)
    }

    /// `invalidate_fd` (`spec.md` §4.5).
    pub fn invalidate_fd(&mut self, id: WatcherId) -> Option<RawFd> {
        invalidate::invalidate_fd(&mut self.registry, &mut self.ring, id)
    }

    /// `io_check_fd` (`spec.md` §6): validates that `fd` names an open
    /// descriptor, the way the teacher's own handle-init paths probe a
    /// caller-supplied fd before trusting it. Implemented with `fcntl`
    /// `F_GETFD`, the cheapest syscall that fails on a closed fd.
    pub fn io_check_fd(&self, fd: RawFd) -> Result<()> {
        let rc = unsafe { libc::fcntl(fd, libc::F_GETFD) };
        if rc < 0 {
            return Err(ReactorError::Invalid("fd is not open"));
        }
        Ok(())
    }

    /// Looks up the currently-registered watcher for `fd`, if any.
    pub fn lookup_fd(&self, fd: RawFd) -> Option<WatcherId> {
        self.registry.lookup_fd(fd)
    }
}
