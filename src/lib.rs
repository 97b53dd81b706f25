//! An `io_uring`-backed polling core for a libuv-style event loop.
//!
//! This crate implements only the reactor's core: a watcher registry, a
//! one-shot-poll-then-rearm engine built on `IORING_OP_POLL_ADD`, idle-time
//! accounting, and the clock/signal-mask bookkeeping a real event loop
//! needs around its blocking wait. It does not implement any handle type
//! (TCP, timers, pipes, child processes) — those are built on top of a
//! [`Loop`] and a [`watcher::Watcher`] by a caller, the way `uv-tcp.c`
//! and friends are built on top of `uv__io_t` in the library this crate's
//! design is drawn from.
//!
//! See [`Loop`] for the entry point.

mod clock;
mod error;
mod invalidate;
mod metrics;
mod poll;
mod reactor;
mod registry;
mod ring;
mod sys;
mod util;
mod watcher;

pub use error::{ReactorError, Result};
pub use reactor::{ConfigFlags, Loop, RunMode};
pub use watcher::{Callback, Interest, WatcherId};
