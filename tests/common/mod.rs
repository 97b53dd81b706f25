#![allow(dead_code)]

use std::os::unix::io::RawFd;

use uring_reactor::{Callback, Interest, Loop, WatcherId};

/// Installs a `tracing` subscriber for the duration of the test binary, so
/// `poll_step`'s trace-level instrumentation is visible with
/// `RUST_LOG=uring_reactor=trace`. Idempotent: every test in a binary calls
/// this, and only the first call actually installs anything.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "uring_reactor=debug".into()))
        .with_test_writer()
        .try_init();
}

/// Registers a watcher whose callback pushes every `(WatcherId, Interest)`
/// it is invoked with onto a shared `Vec`, for assertions against call
/// order and event masks.
pub fn recording_watcher(
    l: &mut Loop,
    fd: RawFd,
    log: std::rc::Rc<std::cell::RefCell<Vec<(WatcherId, Interest)>>>,
) -> WatcherId {
    let cb: Callback = Box::new(move |_l, id, e| {
        log.borrow_mut().push((id, e));
    });
    l.io_init(fd, cb)
}
