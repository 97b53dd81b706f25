//! Clock & signal gating (`spec.md` §4.7).

use std::io;
use std::mem::MaybeUninit;

/// Read `CLOCK_MONOTONIC`, truncated to millisecond resolution the way
/// `loop.time` caches it (`spec.md` §3, §4.7).
pub fn monotonic_time_ms() -> u64 {
    let mut ts = MaybeUninit::<libc::timespec>::uninit();
    // SAFETY: CLOCK_MONOTONIC is always supported; a null-free out pointer
    // to stack storage is always valid.
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, ts.as_mut_ptr()) };
    assert_eq!(rc, 0, "clock_gettime(CLOCK_MONOTONIC) failed: {}", io::Error::last_os_error());
    let ts = unsafe { ts.assume_init() };
    ts.tv_sec as u64 * 1_000 + ts.tv_nsec as u64 / 1_000_000
}

/// Blocks a signal set around the `wait` call, using the kernel's atomic
/// sigmask parameter on the `io_uring_enter` call rather than a
/// block-then-wait pair with a window in between (`spec.md` §9: "must
/// never implement as unblock → wait").
///
/// The `pthread_sigmask` calls here additionally keep the set blocked for
/// the whole poll step (submission included), matching
/// `linux-io-uring.c`'s own belt-and-suspenders use of both a thread-wide
/// block and the syscall's atomic mask argument.
pub struct SignalGate {
    set: libc::sigset_t,
}

impl SignalGate {
    /// Build a gate blocking just `SIGPROF`, the minimum §4.7 requires.
    pub fn sigprof() -> SignalGate {
        unsafe {
            let mut set: libc::sigset_t = std::mem::zeroed();
            libc::sigemptyset(&mut set);
            libc::sigaddset(&mut set, libc::SIGPROF);
            SignalGate { set }
        }
    }

    pub fn raw(&self) -> *const libc::sigset_t {
        &self.set
    }

    /// Block `self.set` on the calling thread. Panics on failure, same as
    /// `linux-io-uring.c`'s `abort()` on a failed `pthread_sigmask`: this
    /// can only fail from passing an invalid signal number, a programmer
    /// error.
    pub fn block(&self) {
        let rc = unsafe { libc::pthread_sigmask(libc::SIG_BLOCK, &self.set, std::ptr::null_mut()) };
        assert_eq!(rc, 0, "pthread_sigmask(SIG_BLOCK) failed");
    }

    pub fn unblock(&self) {
        let rc = unsafe { libc::pthread_sigmask(libc::SIG_UNBLOCK, &self.set, std::ptr::null_mut()) };
        assert_eq!(rc, 0, "pthread_sigmask(SIG_UNBLOCK) failed");
    }
}
