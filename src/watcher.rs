//! The reactor's unit of registration: an fd, a persistent interest mask,
//! and a callback (`spec.md` §3 "Watcher (W)").

use std::os::unix::io::RawFd;

use bitflags::bitflags;

use crate::reactor::Loop;

bitflags! {
    /// Event mask bits (`spec.md` §6). `READABLE`/`WRITABLE`/`PRIORITIZED`/
    /// `DISCONNECT` are user-settable interest; `ERR`/`HUP` are
    /// delivery-only and always passed through when the kernel reports
    /// them, regardless of what was requested.
    #[derive(Default)]
    pub struct Interest: i16 {
        const READABLE    = libc::POLLIN;
        const WRITABLE    = libc::POLLOUT;
        const PRIORITIZED = libc::POLLPRI;
        const DISCONNECT  = libc::POLLRDHUP;
        const ERR         = libc::POLLERR;
        const HUP         = libc::POLLHUP;
    }
}

/// A stable opaque token identifying a registered [`Watcher`] (`spec.md`
/// §9 design notes). Carried as the `user_data` of its in-flight kernel
/// poll request, and trivially checked for staleness on completion:
/// unlike a raw pointer, a `WatcherId` whose slot has been freed *and*
/// reused by an unrelated watcher will not collide, because `generation`
/// only ever increases for a given slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatcherId {
    pub(crate) slot: u32,
    pub(crate) generation: u32,
}

impl WatcherId {
    pub(crate) fn encode(self) -> u64 {
        (u64::from(self.generation) << 32) | u64::from(self.slot)
    }

    pub(crate) fn decode(bits: u64) -> WatcherId {
        WatcherId {
            slot: bits as u32,
            generation: (bits >> 32) as u32,
        }
    }
}

pub type Callback = Box<dyn FnMut(&mut Loop, WatcherId, Interest)>;

/// A registered watcher (`spec.md` §3 "Watcher (W)").
pub struct Watcher {
    pub(crate) fd: RawFd,
    /// Persistent desired interest, the bitwise OR of everything
    /// `io_start` has requested and `io_stop` hasn't cleared yet.
    pub(crate) pevents: Interest,
    /// What was last armed with the kernel; zeroed while a poll is
    /// in-flight and between iterations, set to `pevents` once
    /// (re-)submitted.
    pub(crate) events: Interest,
    pub(crate) callback: Callback,
    /// On the drain-phase queue, awaiting an SQE.
    pub(crate) queued: bool,
    /// Submitted to the kernel, awaiting a completion.
    pub(crate) in_flight: bool,
    /// `io_stop`/`io_close` cleared `pevents` to zero while a poll was
    /// in-flight; finalize the removal when that completion arrives
    /// instead of re-arming (`spec.md` §4.2).
    pub(crate) retiring: bool,
    pub(crate) generation: u32,
}

impl Watcher {
    pub(crate) fn new(fd: RawFd, callback: Callback, generation: u32) -> Watcher {
        Watcher {
            fd,
            pevents: Interest::empty(),
            events: Interest::empty(),
            callback,
            queued: false,
            in_flight: false,
            retiring: false,
            generation,
        }
    }

    /// Mirrors `spec.md` §3's "if `fd = -1`, the watcher is not
    /// considered for dispatch even if a completion arrives for it."
    pub(crate) fn is_invalidated(&self) -> bool {
        self.fd < 0
    }
}
