//! Idle-time accounting (`spec.md` §4.6). Opt-in via
//! [`crate::reactor::ConfigFlags::IDLE_TIME`]; when disabled the poll
//! engine skips the stamp-and-override dance in step 4 of the algorithm
//! entirely, rather than stamping and discarding, to avoid a redundant
//! non-blocking wait.

/// Nanosecond-resolution wall clock, independent of `loop.time`'s
/// millisecond `CLOCK_MONOTONIC` cache — idle time is measured against
/// real elapsed time around the blocking wait, not the loop's own
/// coarser clock.
fn now_ns() -> u64 {
    let mut ts = std::mem::MaybeUninit::<libc::timespec>::uninit();
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, ts.as_mut_ptr()) };
    assert_eq!(rc, 0, "clock_gettime(CLOCK_MONOTONIC) failed");
    let ts = unsafe { ts.assume_init() };
    ts.tv_sec as u64 * 1_000_000_000 + ts.tv_nsec as u64
}

#[derive(Default)]
pub struct Metrics {
    provider_entry_time: u64,
    idle_time_ns: u64,
}

impl Metrics {
    /// Stamped before each blocking wait that is potentially long
    /// (`timeout != 0`). A no-op when metrics are disabled, callers gate
    /// on `ConfigFlags::IDLE_TIME` themselves per the algorithm.
    pub fn set_provider_entry_time(&mut self) {
        self.provider_entry_time = now_ns();
    }

    /// Accumulate the wall time since the last `set_provider_entry_time`
    /// call into the running idle-time total. Called once per dispatched
    /// callback (including the deferred signal-watcher dispatch), per
    /// `spec.md` §4.4 steps 8 and 10 — calling it more than once between
    /// `set_provider_entry_time` stamps would double count, so the poll
    /// engine only calls it for the *first* callback invoked after a
    /// wait, matching `uv__metrics_update_idle_time`'s own latch.
    pub fn update_idle_time(&mut self) {
        if self.provider_entry_time == 0 {
            return;
        }
        let now = now_ns();
        self.idle_time_ns += now.saturating_sub(self.provider_entry_time);
        self.provider_entry_time = 0;
    }

    /// Monotonically non-decreasing total idle time, in nanoseconds.
    pub fn idle_time_ns(&self) -> u64 {
        self.idle_time_ns
    }
}
