//! `invalidate_fd` (`spec.md` §4.5): the emergency exit used when a
//! caller has already closed an fd out from under a live watcher (a
//! common embedder mistake the loop has to survive without crashing).
//! Unlike `io_stop`/`io_close`, which wait for the in-flight completion
//! before tearing anything down, invalidation acts immediately: the fd
//! slot is gone the instant this returns, because the same fd number
//! may already have been handed back out by the kernel.

use std::os::unix::io::RawFd;

use crate::registry::Registry;
use crate::ring::Ring;
use crate::watcher::WatcherId;

/// Invalidates the watcher at `id`, if it still exists and isn't
/// already invalidated. Submits a `POLL_REMOVE` for its in-flight poll
/// (if any), tagged with the reserved sentinel `user_data = 0` so its
/// own completion is trivially recognized and discarded. The slab slot
/// itself is only finalized later, when the original `POLL_ADD`'s
/// completion arrives and the dispatch step sees `is_invalidated()` —
/// `invalidate_fd` doesn't set `retiring`, the fd going to `-1` is
/// itself the signal to finalize.
pub fn invalidate_fd(registry: &mut Registry, ring: &mut Ring, id: WatcherId) -> Option<RawFd> {
    let was_in_flight = registry.get(id).map(|w| w.in_flight).unwrap_or(false);
    let old_fd = registry.invalidate(id)?;
    if was_in_flight {
        ring.encode_poll_remove(id);
        // `spec.md` §4.5: "submission must succeed" — flush immediately
        // rather than waiting for the next drain phase to happen to
        // carry it along, since an empty watcher queue would otherwise
        // leave this SQE unsynced in the local tail indefinitely.
        ring.submit().expect("submit failed during invalidate_fd");
    }
    Some(old_fd)
}
