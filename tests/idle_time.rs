mod common;

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use uring_reactor::{ConfigFlags, Interest, Loop, RunMode};

/// Scenario 1: idle time accrues while the loop blocks waiting for a
/// delayed write, and is observable through `idle_time_ns`. There is no
/// timer handle in this crate, so the delay is driven by a second
/// thread sleeping before writing into a pipe the loop is already
/// blocked polling.
#[test]
fn idle_time_accrues_across_a_blocking_wait() -> anyhow::Result<()> {
    common::init_tracing();
    let mut l = Loop::init()?;
    l.configure(ConfigFlags::IDLE_TIME);

    let (rp, wp) = nix::unistd::pipe()?;
    let seen = Rc::new(RefCell::new(Vec::new()));
    let id = common::recording_watcher(&mut l, rp, seen.clone());
    l.io_start(id, Interest::READABLE)?;

    assert_eq!(l.idle_time_ns(), 0);

    let writer = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(100));
        nix::unistd::write(wp, b"delayed").expect("write failed");
        wp
    });

    l.run(RunMode::Once);
    let wp = writer.join().expect("writer thread panicked");

    assert_eq!(seen.borrow().len(), 1);
    assert!(
        l.idle_time_ns() >= Duration::from_millis(50).as_nanos() as u64,
        "idle time {} ns should reflect most of the 100ms delay",
        l.idle_time_ns()
    );

    l.io_stop(id, Interest::READABLE)?;
    l.io_close(id)?;
    while l.run(RunMode::NoWait) {}
    let _ = nix::unistd::close(rp);
    let _ = nix::unistd::close(wp);
    l.close().map_err(|(_, e)| e)?;
    Ok(())
}

/// Scenario 2: idle-time accounting is per-loop, not global — two
/// independent `Loop`s on two threads must not observe each other's
/// idle time.
#[test]
fn idle_time_is_independent_per_loop() -> anyhow::Result<()> {
    fn run_one(busy: bool) -> anyhow::Result<u64> {
        common::init_tracing();
        let mut l = Loop::init()?;
        l.configure(ConfigFlags::IDLE_TIME);
        let (rp, wp) = nix::unistd::pipe()?;
        let seen = Rc::new(RefCell::new(Vec::new()));
        let id = common::recording_watcher(&mut l, rp, seen.clone());
        l.io_start(id, Interest::READABLE)?;

        if busy {
            nix::unistd::write(wp, b"now")?;
        } else {
            std::thread::sleep(Duration::from_millis(80));
            nix::unistd::write(wp, b"late")?;
        }
        l.run(RunMode::Once);

        let idle = l.idle_time_ns();
        l.io_stop(id, Interest::READABLE)?;
        l.io_close(id)?;
        while l.run(RunMode::NoWait) {}
        let _ = nix::unistd::close(rp);
        let _ = nix::unistd::close(wp);
        l.close().map_err(|(_, e)| e)?;
        Ok(idle)
    }

    let busy = std::thread::spawn(|| run_one(true));
    let idle = std::thread::spawn(|| run_one(false));

    let busy_ns = busy.join().unwrap()?;
    let idle_ns = idle.join().unwrap()?;

    assert!(idle_ns > busy_ns, "idle={} busy={}", idle_ns, busy_ns);
    Ok(())
}
