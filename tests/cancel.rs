mod common;

use std::cell::RefCell;
use std::rc::Rc;

use uring_reactor::{Interest, Loop, RunMode};

/// Scenario 4: cancel before completion. A watcher's in-flight poll is
/// invalidated (simulating the owner closing its fd) before anything
/// became ready; the stale completion must be silently dropped and the
/// callback must never run.
#[test]
fn invalidate_in_flight_poll_drops_stale_completion() -> anyhow::Result<()> {
    common::init_tracing();
    let mut l = Loop::init()?;
    let (rp, wp) = nix::unistd::pipe()?;

    let seen = Rc::new(RefCell::new(Vec::new()));
    let id = common::recording_watcher(&mut l, rp, seen.clone());
    l.io_start(id, Interest::READABLE)?;

    // Drain phase arms the poll against the kernel.
    l.run(RunMode::NoWait);

    // Caller closes the fd out from under the watcher.
    let _ = nix::unistd::close(rp);
    l.invalidate_fd(id);

    // Write into the (still open) write end; irrelevant now, the read
    // end is gone, but this also exercises that a completion can arrive
    // for an invalidated watcher without panicking.
    let _ = nix::unistd::write(wp, b"noop");
    l.run(RunMode::NoWait);

    assert!(seen.borrow().is_empty(), "invalidated watcher must not dispatch");

    let _ = nix::unistd::close(wp);
    l.close().map_err(|(_, e)| e)?;
    Ok(())
}

/// An fd invalidated before it was ever armed (still sitting in the
/// drain queue) must simply be skipped by the drain phase.
#[test]
fn invalidate_before_arming() -> anyhow::Result<()> {
    common::init_tracing();
    let mut l = Loop::init()?;
    let (rp, wp) = nix::unistd::pipe()?;

    let seen = Rc::new(RefCell::new(Vec::new()));
    let id = common::recording_watcher(&mut l, rp, seen.clone());
    l.io_start(id, Interest::READABLE)?;

    let _ = nix::unistd::close(rp);
    l.invalidate_fd(id);

    l.run(RunMode::NoWait);
    assert!(seen.borrow().is_empty());

    let _ = nix::unistd::close(wp);
    l.close().map_err(|(_, e)| e)?;
    Ok(())
}
