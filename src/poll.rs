//! The poll engine (`spec.md` §4.4): the single central algorithm that
//! drains newly-armed watchers into the ring, blocks for completions,
//! and dispatches callbacks. Everything else in this crate exists to
//! support `poll_step`.

use tracing::{error, trace};

use crate::clock::{monotonic_time_ms, SignalGate};
use crate::reactor::{ConfigFlags, Loop, RunMode};
use crate::registry::Registry;
use crate::ring::{Ring, WaitOutcome};
use crate::watcher::{Interest, WatcherId};

/// Runs `poll_step` according to `mode`, returning whether the loop has
/// remaining work (`spec.md` §6 `Loop::run` -> `bool`).
pub fn run(l: &mut Loop, mode: RunMode) -> bool {
    match mode {
        RunMode::NoWait => {
            poll_step(l, 0);
        }
        RunMode::Once => {
            poll_step(l, -1);
        }
        RunMode::Default => {
            // Per `spec.md` §4.1: run until `nfds = 0` *and* no pending
            // work — a retiring watcher's in-flight completion still
            // needs a poll step to drain it even after `nfds` has
            // already dropped to zero.
            while l.registry.nfds() > 0 || l.registry.in_flight_count() > 0 {
                poll_step(l, -1);
            }
        }
    }
    l.registry.nfds() > 0
}

/// A single iteration of the eleven-step algorithm (`spec.md` §4.4).
/// `timeout_ms` is the caller's requested bound: `-1` blocks
/// indefinitely until progress, `0` never blocks, `>0` bounds the wait.
fn poll_step(l: &mut Loop, timeout_ms: i32) {
    // Step 1. A retiring watcher's in-flight poll can leave `nfds == 0`
    // with a completion still outstanding; only skip the step entirely
    // when nothing is armed *and* nothing is in flight (`spec.md` §4.1:
    // "until nfds = 0 and no pending work").
    if l.registry.nfds() == 0 && l.registry.in_flight_count() == 0 {
        if !l.registry.queue_is_empty() {
            error!("BUG: nfds == 0 but the watcher queue is non-empty");
        }
        debug_assert!(
            l.registry.queue_is_empty(),
            "BUG: nfds == 0 but the watcher queue is non-empty"
        );
        return;
    }

    trace!(nfds = l.registry.nfds(), timeout_ms, "poll_step: entering");

    let mut timeout_ms = timeout_ms;
    let idle_enabled = l.config.contains(ConfigFlags::IDLE_TIME);
    // Mirrors `uv__io_poll`'s own `reset_timeout`: the very first wait of
    // a poll step is forced non-blocking so the idle-time stamp brackets
    // real wait latency, then the caller's actual timeout is restored for
    // every wait after that. Forcing it on every pass would turn a
    // blocking run into a busy spin whenever idle-time accounting is on.
    let mut reset_timeout = idle_enabled;

    loop {
        // Step 2: drain phase.
        drain_phase(&mut l.registry, &mut l.ring);

        // Step 3: signal gating.
        let gate = if l.config.contains(ConfigFlags::BLOCK_SIGPROF) {
            let gate = SignalGate::sigprof();
            gate.block();
            Some(gate)
        } else {
            None
        };

        // Step 4: wait phase setup.
        let base = l.time;
        let user_timeout = timeout_ms;
        let mut wait_timeout = timeout_ms;
        if reset_timeout {
            l.metrics.set_provider_entry_time();
            wait_timeout = 0;
        }

        let min_complete = if wait_timeout == 0 { 0 } else { 1 };
        let outcome = l.ring.wait(min_complete, wait_timeout, gate.as_ref()).unwrap_or_else(|e| {
            error!(error = %e, "io_uring_enter failed in wait()");
            panic!("io_uring_enter failed in wait(): {}", e);
        });

        if let Some(gate) = &gate {
            gate.unblock();
        }

        // Step 6: time update, unconditional.
        l.time = monotonic_time_ms();

        // The first wait of a poll step may have been forced
        // non-blocking above for idle-time bracketing; once it returns —
        // `Ready` or `Empty` — restore the caller's real timeout
        // unconditionally, so a later wait in this same `poll_step` call
        // is never forced non-blocking again. Clearing this only inside
        // the `Empty` branch below would leave `reset_timeout` set after
        // a `Ready` wait whose completions were all filtered out (no
        // callback invoked), turning the next iteration's wait into
        // another forced zero-timeout probe instead of a real block.
        let was_reset_timeout = reset_timeout;
        reset_timeout = false;

        // Step 7: timed-out / empty wait.
        if matches!(outcome, WaitOutcome::Empty) {
            if was_reset_timeout {
                // That was the forced non-blocking probe, not a real
                // timeout: restore the caller's timeout and loop again
                // without touching the elapsed-time budget.
                if user_timeout == -1 {
                    continue;
                }
                if user_timeout == 0 {
                    return;
                }
                timeout_ms = user_timeout;
                continue;
            }
            if user_timeout == -1 {
                continue;
            }
            if user_timeout == 0 {
                return;
            }
            // fall through to step 10/11's timeout bookkeeping below,
            // with nothing dispatched this round.
            let elapsed = l.time.saturating_sub(base) as i64;
            let real = user_timeout as i64 - elapsed;
            if real <= 0 {
                return;
            }
            timeout_ms = real as i32;
            continue;
        }

        // Step 8: dispatch phase.
        let mut invoked_any = false;
        let mut deferred_signal: Option<(WatcherId, i32)> = None;
        let mut consumed = 0u32;
        let mut idle_accounted = false;

        let completions: Vec<_> = l.ring.for_each_completion().collect();
        for c in &completions {
            consumed += 1;

            if c.user_data == crate::sys::LIBURING_UDATA_TIMEOUT || c.user_data == 0 {
                continue;
            }

            let id = WatcherId::decode(c.user_data);
            let is_signal_watcher = l.signal_watcher == Some(id);

            let (pevents, invalidated) = match l.registry.get(id) {
                Some(w) => (w.pevents, w.is_invalidated()),
                None => (Interest::empty(), true),
            };
            if invalidated {
                trace!(?id, "dropping stale completion for invalidated watcher");
                l.registry.requeue_or_finalize(id);
                continue;
            }

            if let Some(w) = l.registry.get_mut(id) {
                w.events = Interest::empty();
            }
            l.registry.requeue_or_finalize(id);
            if let Some(w) = l.registry.get_mut(id) {
                w.events = w.pevents;
            }

            let mask_bits = (pevents | Interest::ERR | Interest::HUP).bits();
            let e_bits = c.res & i32::from(mask_bits);
            if e_bits == 0 {
                continue;
            }
            let e = Interest::from_bits_truncate(e_bits as i16);

            if is_signal_watcher {
                deferred_signal = Some((id, e_bits));
                continue;
            }

            if !idle_accounted && idle_enabled {
                l.metrics.update_idle_time();
                idle_accounted = true;
            }
            trace!(?id, ?e, "dispatching watcher callback");
            invoke(l, id, e);
            invoked_any = true;
        }

        // Step 9: completion release.
        l.ring.advance(consumed);

        // Step 10: deferred signal-watcher dispatch.
        if let Some((id, e_bits)) = deferred_signal {
            if !idle_accounted && idle_enabled {
                l.metrics.update_idle_time();
            }
            let e = Interest::from_bits_truncate(e_bits as i16) | Interest::READABLE;
            invoke(l, id, e);
            return;
        }

        // Step 11: termination conditions.
        if invoked_any || user_timeout == 0 {
            return;
        }
        if user_timeout == -1 {
            timeout_ms = -1;
            continue;
        }
        let elapsed = l.time.saturating_sub(base) as i64;
        let real = user_timeout as i64 - elapsed;
        if real <= 0 {
            return;
        }
        timeout_ms = real as i32;
    }
}

fn drain_phase(registry: &mut Registry, ring: &mut Ring) {
    let ready = registry.drain_queue();
    if ready.is_empty() {
        return;
    }
    trace!(count = ready.len(), "drain phase: arming watchers");
    for (id, fd, events) in ready {
        ring.encode_poll_add(fd, events.bits(), id);
    }
    if let Err(e) = ring.submit() {
        error!(error = %e, "submit failed during drain phase");
        panic!("submit failed during drain phase: {}", e);
    }
}

fn invoke(l: &mut Loop, id: WatcherId, e: Interest) {
    let callback = l.registry.get_mut(id).map(|w| {
        // Temporarily move the callback out so it can take `&mut Loop`
        // without aliasing `l.registry` while running.
        std::mem::replace(&mut w.callback, Box::new(|_, _, _| {}))
    });
    if let Some(mut callback) = callback {
        callback(l, id, e);
        if let Some(w) = l.registry.get_mut(id) {
            w.callback = callback;
        }
    }
}
