//! Watcher registry (`spec.md` §4.2): the fd → watcher table, the
//! generation counter that makes [`WatcherId`] tokens detect staleness,
//! and the queue of watchers awaiting (re-)arming. Grounded on the
//! teacher's use of `slab` as a dev-dependency for slot-stable storage;
//! here it is promoted to a normal dependency since the reactor core
//! needs the same stable-index-with-reuse property for its watcher
//! arena that the teacher only needed in its own tests.

use std::collections::VecDeque;
use std::os::unix::io::RawFd;

use slab::Slab;

use crate::error::{ReactorError, Result};
use crate::watcher::{Callback, Interest, Watcher, WatcherId};

/// Owns every registered [`Watcher`], keyed by a generational slot. Also
/// tracks `nfds` (the count of watchers with nonzero `pevents`, `spec.md`
/// §3) and the drain-phase `watcher_queue`.
#[derive(Default)]
pub struct Registry {
    slots: Slab<Watcher>,
    generations: Vec<u32>,
    /// fd -> slot, for `invalidate_fd`/`io_check_fd`. A negative fd (an
    /// already-invalidated watcher) never appears here.
    by_fd: std::collections::HashMap<RawFd, usize>,
    queue: VecDeque<usize>,
    nfds: usize,
    /// Watchers with a kernel poll currently outstanding, including ones
    /// retiring (`pevents` cleared but the in-flight completion not yet
    /// observed). `spec.md` §4.1's `run(DEFAULT)` must keep iterating
    /// while this is nonzero even if `nfds` has already dropped to zero,
    /// matching "until nfds = 0 and no pending work" — otherwise a
    /// retiring watcher's completion is never drained and its slot leaks.
    in_flight_count: usize,
}

impl Registry {
    pub fn new() -> Registry {
        Registry::default()
    }

    pub fn nfds(&self) -> usize {
        self.nfds
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn queue_is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Number of watchers with a kernel poll currently outstanding
    /// (armed or retiring). Used alongside `nfds` to decide whether a
    /// poll step has any reason to run (`spec.md` §4.1 `run(DEFAULT)`).
    pub fn in_flight_count(&self) -> usize {
        self.in_flight_count
    }

    fn next_generation(&mut self, slot: usize) -> u32 {
        if slot >= self.generations.len() {
            self.generations.resize(slot + 1, 0);
        }
        self.generations[slot]
    }

    /// `io_init`: registers a new watcher, unarmed (`spec.md` §4.2).
    /// Returns the token callers use for every later operation.
    pub fn insert(&mut self, fd: RawFd, callback: Callback) -> WatcherId {
        let slot = self.slots.vacant_key();
        let generation = self.next_generation(slot);
        let watcher = Watcher::new(fd, callback, generation);
        let inserted = self.slots.insert(watcher);
        debug_assert_eq!(inserted, slot);
        self.by_fd.insert(fd, slot);
        WatcherId { slot: slot as u32, generation }
    }

    pub fn get(&self, id: WatcherId) -> Option<&Watcher> {
        let watcher = self.slots.get(id.slot as usize)?;
        if watcher.generation == id.generation {
            Some(watcher)
        } else {
            None
        }
    }

    pub fn get_mut(&mut self, id: WatcherId) -> Option<&mut Watcher> {
        let watcher = self.slots.get_mut(id.slot as usize)?;
        if watcher.generation == id.generation {
            Some(watcher)
        } else {
            None
        }
    }

    fn slot_id(&self, slot: usize) -> WatcherId {
        WatcherId {
            slot: slot as u32,
            generation: self.slots[slot].generation,
        }
    }

    /// `io_start`: sets/merges requested interest and enqueues the
    /// watcher for (re-)arming if it isn't already queued or in flight
    /// (`spec.md` §4.2 precondition: `mask != 0`).
    pub fn start(&mut self, id: WatcherId, mask: Interest) -> Result<()> {
        assert!(!mask.is_empty(), "BUG: io_start called with an empty mask");
        let slot = id.slot as usize;
        let watcher = self
            .slots
            .get_mut(slot)
            .filter(|w| w.generation == id.generation)
            .ok_or(ReactorError::Invalid("io_start on an unknown watcher"))?;

        if watcher.is_invalidated() {
            return Err(ReactorError::Invalid("io_start on an invalidated fd"));
        }

        let was_armed = !watcher.pevents.is_empty();
        watcher.pevents |= mask;
        watcher.retiring = false;

        if !was_armed {
            self.nfds += 1;
        }
        if !watcher.queued && !watcher.in_flight {
            watcher.queued = true;
            self.queue.push_back(slot);
        }
        Ok(())
    }

    /// `io_stop`: clears requested interest. If no poll is in flight the
    /// watcher is dropped from `nfds` immediately; otherwise it is
    /// marked `retiring` and finalized when the stale completion for its
    /// in-flight poll arrives (`spec.md` §4.2 deferred-removal design).
    pub fn stop(&mut self, id: WatcherId, mask: Interest) -> Result<()> {
        let slot = id.slot as usize;
        let watcher = self
            .slots
            .get_mut(slot)
            .filter(|w| w.generation == id.generation)
            .ok_or(ReactorError::Invalid("io_stop on an unknown watcher"))?;

        if watcher.pevents.is_empty() {
            return Ok(());
        }
        watcher.pevents -= mask;

        if watcher.pevents.is_empty() {
            self.nfds -= 1;
            if watcher.in_flight {
                watcher.retiring = true;
            } else if watcher.queued {
                // Never got submitted: pull it out of the drain queue
                // right away rather than leaving a stale entry behind,
                // so `nfds == 0` keeps implying the queue is empty even
                // between poll steps (`spec.md` §4.4 step 1).
                watcher.queued = false;
                self.queue.retain(|&s| s != slot);
            }
        }
        Ok(())
    }

    /// `io_close`: stops all interest and removes the watcher once it is
    /// safe to do so. Returns an error if called while a poll for this
    /// watcher is in flight and not yet observed (`spec.md` §4.2: the
    /// caller must wait for the retiring completion, mirroring
    /// `io_stop`'s deferred-removal contract).
    pub fn close(&mut self, id: WatcherId) -> Result<()> {
        let slot = id.slot as usize;
        {
            let watcher = self
                .slots
                .get_mut(slot)
                .filter(|w| w.generation == id.generation)
                .ok_or(ReactorError::Invalid("io_close on an unknown watcher"))?;
            if !watcher.pevents.is_empty() {
                self.nfds -= 1;
                watcher.pevents = Interest::empty();
            }
            if watcher.in_flight {
                watcher.retiring = true;
                return Ok(());
            }
        }
        self.finalize_remove(slot);
        Ok(())
    }

    /// Removes a slot from the table and bumps its generation so any
    /// outstanding [`WatcherId`] pointing at it is detected as stale
    /// forever after (`spec.md` §9 design note).
    fn finalize_remove(&mut self, slot: usize) {
        if let Some(watcher) = self.slots.try_remove(slot) {
            self.by_fd.remove(&watcher.fd);
        }
        if slot >= self.generations.len() {
            self.generations.resize(slot + 1, 0);
        }
        self.generations[slot] = self.generations[slot].wrapping_add(1);
        // A watcher can be closed while still sitting in the drain
        // queue (io_stop dropped it to zero interest without an
        // in-flight poll, then io_close followed immediately); purge it
        // here rather than leaving a stale index for `drain_queue` to
        // skip, so `nfds == 0` always implies the queue is empty too.
        if !self.queue.is_empty() {
            self.queue.retain(|&s| s != slot);
        }
    }

    pub fn lookup_fd(&self, fd: RawFd) -> Option<WatcherId> {
        let slot = *self.by_fd.get(&fd)?;
        Some(self.slot_id(slot))
    }

    /// Drains the arming queue, yielding `(id, fd, pevents)` for every
    /// watcher that still wants to be armed. Watchers whose interest
    /// went back to empty before their turn (a `io_start` immediately
    /// followed by `io_stop`) are silently dropped here rather than
    /// submitted, per `spec.md` §4.4 step 1.
    pub fn drain_queue(&mut self) -> Vec<(WatcherId, RawFd, Interest)> {
        let mut out = Vec::with_capacity(self.queue.len());
        while let Some(slot) = self.queue.pop_front() {
            let id = self.slot_id(slot);
            if let Some(watcher) = self.slots.get_mut(slot) {
                watcher.queued = false;
                if watcher.pevents.is_empty() || watcher.is_invalidated() {
                    continue;
                }
                watcher.events = watcher.pevents;
                watcher.in_flight = true;
                self.in_flight_count += 1;
                out.push((id, watcher.fd, watcher.events));
            }
        }
        out
    }

    /// Re-enqueues a watcher for arming (used after a completion is
    /// dispatched and `pevents` is still nonzero), or finalizes its
    /// removal if it was retiring. Mirrors poll-engine step 8.
    pub fn requeue_or_finalize(&mut self, id: WatcherId) {
        let slot = id.slot as usize;
        let (retiring, should_requeue) = match self.slots.get_mut(slot) {
            Some(watcher) if watcher.generation == id.generation => {
                watcher.in_flight = false;
                self.in_flight_count = self.in_flight_count.saturating_sub(1);
                if watcher.retiring || watcher.pevents.is_empty() {
                    (true, false)
                } else if !watcher.queued {
                    watcher.queued = true;
                    (false, true)
                } else {
                    (false, false)
                }
            }
            _ => return,
        };

        if should_requeue {
            self.queue.push_back(slot);
        }
        if retiring {
            self.finalize_remove(slot);
        }
    }

    /// Marks a watcher invalidated in place (`invalidate_fd`, `spec.md`
    /// §4.5): the fd is set to `-1` so `is_invalidated` short-circuits
    /// any later dispatch, and the fd-table entry is removed
    /// immediately rather than deferred, since an invalidated fd can be
    /// reused by the OS right away.
    pub fn invalidate(&mut self, id: WatcherId) -> Option<RawFd> {
        let slot = id.slot as usize;
        let watcher = self.slots.get_mut(slot)?;
        if watcher.generation != id.generation || watcher.is_invalidated() {
            return None;
        }
        let old_fd = watcher.fd;
        self.by_fd.remove(&old_fd);
        watcher.fd = -1;
        if !watcher.pevents.is_empty() {
            self.nfds -= 1;
            watcher.pevents = Interest::empty();
        }
        let in_flight = watcher.in_flight;
        if !in_flight {
            // No kernel poll outstanding for this watcher (it was either
            // never armed or already dispatched), so there is no future
            // completion to wait for: free the slot right away instead
            // of leaking it until a completion that will never arrive.
            self.finalize_remove(slot);
        }
        Some(old_fd)
    }
}
