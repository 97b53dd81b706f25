mod common;

use std::cell::RefCell;
use std::os::unix::io::AsRawFd;
use std::rc::Rc;

use socket2::{Domain, Socket, Type};
use uring_reactor::{Interest, Loop, RunMode};

/// Scenario 5: poll with disconnect. A `DISCONNECT` watcher on one end
/// of a connected stream socket pair observes `POLLRDHUP` once the peer
/// shuts its write side down.
#[test]
fn disconnect_interest_observes_peer_shutdown() -> anyhow::Result<()> {
    common::init_tracing();
    let mut l = Loop::init()?;

    let (a, b) = socketpair_stream()?;
    let a_fd = a.as_raw_fd();

    let seen = Rc::new(RefCell::new(Vec::new()));
    let id = common::recording_watcher(&mut l, a_fd, seen.clone());
    l.io_start(id, Interest::DISCONNECT)?;

    b.shutdown(std::net::Shutdown::Write)?;

    l.run(RunMode::Once);

    assert_eq!(seen.borrow().len(), 1);
    assert!(seen.borrow()[0].1.contains(Interest::DISCONNECT));

    l.io_stop(id, Interest::DISCONNECT)?;
    l.io_close(id)?;
    while l.run(RunMode::NoWait) {}
    drop(a);
    drop(b);
    l.close().map_err(|(_, e)| e)?;
    Ok(())
}

/// Scenario 6: out-of-band data. A `PRIORITIZED` watcher observes a
/// `MSG_OOB` byte sent on a TCP loopback pair.
#[test]
fn oob_byte_is_observed_as_prioritized() -> anyhow::Result<()> {
    common::init_tracing();
    let mut l = Loop::init()?;

    let listener = Socket::new(Domain::ipv4(), Type::stream(), None)?;
    listener.bind(&"127.0.0.1:0".parse::<std::net::SocketAddr>()?.into())?;
    listener.listen(1)?;
    let addr = listener.local_addr()?;

    let client = Socket::new(Domain::ipv4(), Type::stream(), None)?;
    client.connect(&addr)?;
    let (server, _) = listener.accept()?;

    let server_fd = server.as_raw_fd();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let id = common::recording_watcher(&mut l, server_fd, seen.clone());
    l.io_start(id, Interest::PRIORITIZED)?;

    let out_of_band = [0x7fu8];
    client.send_with_flags(&out_of_band, libc::MSG_OOB)?;

    l.run(RunMode::Once);

    assert_eq!(seen.borrow().len(), 1);
    assert!(seen.borrow()[0].1.contains(Interest::PRIORITIZED));

    l.io_stop(id, Interest::PRIORITIZED)?;
    l.io_close(id)?;
    while l.run(RunMode::NoWait) {}
    drop(server);
    drop(client);
    drop(listener);
    l.close().map_err(|(_, e)| e)?;
    Ok(())
}

fn socketpair_stream() -> anyhow::Result<(Socket, Socket)> {
    let (a, b) = Socket::pair(Domain::unix(), Type::stream(), None)?;
    Ok((a, b))
}
