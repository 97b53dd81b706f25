//! Ring manager (`spec.md` §4.3): initializes/tears down the SQ/CQ pair,
//! hands out submission queue entries, submits batches, and waits for
//! completions. Modeled on `tokio-rs-io-uring`'s `IoUring`/`SubmissionQueue`
//! /`CompletionQueue`, collapsed into a single type because this crate
//! only ever submits three opcodes (`POLL_ADD`, `POLL_REMOVE`, and the
//! internal bounding `TIMEOUT`) and never needs the teacher's generic
//! `Entry`/opcode-builder surface.

use std::cmp;
use std::mem::{self, ManuallyDrop};
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{self, AtomicU32};

use tracing::{error, warn};

use crate::clock::SignalGate;
use crate::error::{ReactorError, Result};
use crate::sys;
use crate::util::{unsync_load, Fd, Mmap};
use crate::watcher::WatcherId;

/// Default ring capacity (`spec.md` §3 "Ring (R)"): `IOURING_SQ_SIZE` in
/// the teacher's C source.
pub const DEFAULT_ENTRIES: u32 = 4096;

struct MemoryMap {
    sq_mmap: Mmap,
    sqe_mmap: Mmap,
    cq_mmap: Option<Mmap>,
}

/// Outcome of a bounded [`Ring::wait`] call, already folded per §9's
/// resolved open question: a kernel `ETIME` and the sign-confused
/// `EAGAIN` branch are both reported as `Empty`, so `poll.rs` never has
/// to special-case which one it got.
pub enum WaitOutcome {
    /// At least one real completion (or the internal timeout/cancel
    /// sentinel) is sitting in the CQ.
    Ready,
    /// Nothing arrived before the deadline.
    Empty,
}

pub struct Ring {
    fd: Fd,
    memory: ManuallyDrop<MemoryMap>,
    features: u32,

    sq_head: *const AtomicU32,
    sq_tail: *const AtomicU32,
    sq_ring_mask: u32,
    sq_ring_entries: u32,
    sq_dropped: *const AtomicU32,
    sq_array: *mut u32,
    sqes: *mut sys::io_uring_sqe,
    /// Local, not-yet-synced tail; `sync` flushes it to `sq_tail`.
    sq_local_tail: u32,

    cq_head: *const AtomicU32,
    cq_tail: *const AtomicU32,
    cq_ring_mask: u32,
    cqes: *const sys::io_uring_cqe,

    /// Scratch storage for the bounding timeout submitted by `wait` when
    /// `timeout_ms > 0`. Must outlive the submission (the kernel reads
    /// `addr` at execution time, not just at `io_uring_enter` time).
    wait_timespec: sys::__kernel_timespec,
}

unsafe impl Send for Ring {}

impl Ring {
    pub fn new(entries: u32) -> Result<Ring> {
        let mut params: sys::io_uring_params = Default::default();

        let fd: Fd = unsafe {
            let rc = sys::io_uring_setup(entries, &mut params);
            if rc < 0 {
                let err = std::io::Error::last_os_error();
                error!(error = %err, entries, "io_uring_setup failed");
                return Err(match err.raw_os_error() {
                    Some(libc::ENOMEM) => ReactorError::OutOfMemory,
                    _ => ReactorError::PlatformUnavailable(err),
                });
            }
            Fd::new(rc)
        };

        let sq_len =
            params.sq_off.array as usize + params.sq_entries as usize * mem::size_of::<u32>();
        let cq_len = params.cq_off.cqes as usize
            + params.cq_entries as usize * mem::size_of::<sys::io_uring_cqe>();
        let sqe_len = params.sq_entries as usize * mem::size_of::<sys::io_uring_sqe>();

        let sqe_mmap = Mmap::new(&fd, sys::IORING_OFF_SQES as libc::off_t, sqe_len)
            .map_err(ReactorError::Io)?;

        let (sq_mmap, cq_mmap) = if params.features & sys::IORING_FEAT_SINGLE_MMAP != 0 {
            let scq = Mmap::new(
                &fd,
                sys::IORING_OFF_SQ_RING as libc::off_t,
                cmp::max(sq_len, cq_len),
            )
            .map_err(ReactorError::Io)?;
            (scq, None)
        } else {
            let sq = Mmap::new(&fd, sys::IORING_OFF_SQ_RING as libc::off_t, sq_len)
                .map_err(ReactorError::Io)?;
            let cq = Mmap::new(&fd, sys::IORING_OFF_CQ_RING as libc::off_t, cq_len)
                .map_err(ReactorError::Io)?;
            (sq, Some(cq))
        };

        let cq_mmap_ref = cq_mmap.as_ref().unwrap_or(&sq_mmap);

        unsafe {
            let sq_head = sq_mmap.offset(params.sq_off.head) as *const AtomicU32;
            let sq_tail = sq_mmap.offset(params.sq_off.tail) as *const AtomicU32;
            let sq_ring_mask = sq_mmap.offset(params.sq_off.ring_mask).cast::<u32>().read();
            let sq_ring_entries = sq_mmap
                .offset(params.sq_off.ring_entries)
                .cast::<u32>()
                .read();
            let sq_dropped = sq_mmap.offset(params.sq_off.dropped) as *const AtomicU32;
            let sq_array = sq_mmap.offset(params.sq_off.array) as *mut u32;
            let sqes = sqe_mmap.as_mut_ptr() as *mut sys::io_uring_sqe;

            // Map submission indices directly to SQE slots; we never
            // reorder the array independently of the SQE ring.
            for i in 0..sq_ring_entries {
                sq_array.add(i as usize).write_volatile(i);
            }

            let cq_head = cq_mmap_ref.offset(params.cq_off.head) as *const AtomicU32;
            let cq_tail = cq_mmap_ref.offset(params.cq_off.tail) as *const AtomicU32;
            let cq_ring_mask = cq_mmap_ref
                .offset(params.cq_off.ring_mask)
                .cast::<u32>()
                .read();
            let cqes = cq_mmap_ref.offset(params.cq_off.cqes) as *const sys::io_uring_cqe;

            Ok(Ring {
                fd,
                memory: ManuallyDrop::new(MemoryMap {
                    sq_mmap,
                    sqe_mmap,
                    cq_mmap,
                }),
                features: params.features,
                sq_head,
                sq_tail,
                sq_ring_mask,
                sq_ring_entries,
                sq_dropped,
                sq_array,
                sqes,
                sq_local_tail: unsync_load(sq_tail),
                cq_head,
                cq_tail,
                cq_ring_mask,
                cqes,
                wait_timespec: Default::default(),
            })
        }
    }

    fn sq_len(&self) -> u32 {
        let head = unsafe { (*self.sq_head).load(atomic::Ordering::Acquire) };
        self.sq_local_tail.wrapping_sub(head)
    }

    fn sq_is_full(&self) -> bool {
        self.sq_len() >= self.sq_ring_entries
    }

    fn sync_sq(&self) {
        unsafe {
            (*self.sq_tail).store(self.sq_local_tail, atomic::Ordering::Release);
        }
    }

    /// Ring manager `get_sqe` (`spec.md` §4.3): returns a free submission
    /// entry, submitting once and retrying if the SQ was full. A second
    /// failure means the ring is too small for the loop's working set —
    /// a fatal invariant violation (`BUG`, §7), not a recoverable error.
    fn acquire_sqe(&mut self) -> &mut sys::io_uring_sqe {
        if self.sq_is_full() {
            warn!("submission queue full, flushing to make room for get_sqe");
            self.submit().expect("submit failed while making room for get_sqe");
            if self.sq_is_full() {
                error!("BUG: submission queue still full after a submit cycle; ring capacity too small");
            }
            assert!(
                !self.sq_is_full(),
                "BUG: submission queue still full after a submit cycle; ring capacity too small"
            );
        }
        let idx = (self.sq_local_tail & self.sq_ring_mask) as usize;
        self.sq_local_tail = self.sq_local_tail.wrapping_add(1);
        unsafe { &mut *self.sqes.add(idx) }
    }

    pub fn encode_poll_add(&mut self, fd: libc::c_int, events: i16, token: WatcherId) {
        let sqe = self.acquire_sqe();
        *sqe = sys::io_uring_sqe::default();
        sqe.opcode = sys::IORING_OP_POLL_ADD;
        sqe.fd = fd;
        sqe.op_flags = events as u16 as u32;
        sqe.user_data = token.encode();
    }

    /// Per `spec.md` §4.2, the removal targets the *in-flight* token so a
    /// stale completion racing the removal can still be told apart from a
    /// freshly re-armed one; the sentinel `user_data = 0` identifies the
    /// `POLL_REMOVE`'s own completion, which callers ignore.
    pub fn encode_poll_remove(&mut self, target: WatcherId) {
        let sqe = self.acquire_sqe();
        *sqe = sys::io_uring_sqe::default();
        sqe.opcode = sys::IORING_OP_POLL_REMOVE;
        sqe.addr = target.encode();
        sqe.user_data = 0;
    }

    /// Ring manager `submit` (`spec.md` §4.3): submits all ready entries.
    /// `BUSY` is folded into "zero submitted, retry later"; any other
    /// negative return is surfaced.
    pub fn submit(&mut self) -> std::io::Result<usize> {
        let len = self.sq_len();
        if len == 0 {
            return Ok(0);
        }
        self.sync_sq();
        let rc = unsafe {
            sys::io_uring_enter(
                self.fd.as_raw_fd(),
                len,
                0,
                0,
                std::ptr::null(),
                0,
            )
        };
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            return match err.raw_os_error() {
                Some(libc::EBUSY) | Some(libc::EAGAIN) => {
                    warn!(error = %err, "submit backpressured, will retry later");
                    Ok(0)
                }
                _ => {
                    error!(error = %err, "submit failed");
                    Err(err)
                }
            };
        }
        Ok(rc as usize)
    }

    /// Ring manager `wait` (`spec.md` §4.3). Submits a bounding
    /// `IORING_OP_TIMEOUT` (user_data = the reserved sentinel) when
    /// `timeout_ms > 0`, then calls `io_uring_enter` with
    /// `IORING_ENTER_GETEVENTS`. Interrupted calls (`EINTR`) are retried
    /// here, transparently, per §4.3's contract — the poll engine never
    /// observes `INTERRUPTED`.
    pub fn wait(
        &mut self,
        min_complete: u32,
        timeout_ms: i32,
        sigmask: Option<&SignalGate>,
    ) -> std::io::Result<WaitOutcome> {
        if timeout_ms > 0 {
            self.wait_timespec = sys::__kernel_timespec {
                tv_sec: (timeout_ms / 1000) as i64,
                tv_nsec: (timeout_ms % 1000) as i64 * 1_000_000,
            };
            let ts_ptr: *const sys::__kernel_timespec = &self.wait_timespec;
            let sqe = self.acquire_sqe();
            *sqe = sys::io_uring_sqe::default();
            sqe.opcode = sys::IORING_OP_TIMEOUT;
            sqe.addr = ts_ptr as u64;
            sqe.len = 1;
            sqe.user_data = sys::LIBURING_UDATA_TIMEOUT;
        }

        self.sync_sq();
        let to_submit = self.sq_len();

        let (sig_ptr, sig_size) = match sigmask {
            Some(gate) => (
                gate.raw() as *const libc::c_void,
                mem::size_of::<libc::sigset_t>(),
            ),
            None => (std::ptr::null(), 0),
        };

        loop {
            let rc = unsafe {
                sys::io_uring_enter(
                    self.fd.as_raw_fd(),
                    to_submit,
                    min_complete,
                    sys::IORING_ENTER_GETEVENTS,
                    sig_ptr,
                    sig_size,
                )
            };

            if rc >= 0 {
                return Ok(if self.cq_len() > 0 {
                    WaitOutcome::Ready
                } else {
                    WaitOutcome::Empty
                });
            }

            let err = std::io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR) => continue,
                // §9: fold ETIME and the sign-confused EAGAIN branch into
                // one outcome; both mean "no completions, not a real
                // error".
                Some(libc::ETIME) | Some(libc::EAGAIN) => return Ok(WaitOutcome::Empty),
                _ => return Err(err),
            }
        }
    }

    fn cq_len(&self) -> u32 {
        unsafe {
            let head = unsync_load(self.cq_head);
            let tail = (*self.cq_tail).load(atomic::Ordering::Acquire);
            tail.wrapping_sub(head)
        }
    }

    /// Ring manager `for_each_completion` (`spec.md` §4.3): yields
    /// completions in producer order without advancing the CQ head;
    /// pair with [`Ring::advance`].
    pub fn for_each_completion(&self) -> CompletionIter<'_> {
        CompletionIter {
            ring: self,
            pos: unsafe { unsync_load(self.cq_head) },
            tail: unsafe { (*self.cq_tail).load(atomic::Ordering::Acquire) },
        }
    }

    /// Ring manager `advance` (`spec.md` §4.3): releases `n` completion
    /// slots back to the kernel.
    pub fn advance(&self, n: u32) {
        unsafe {
            (*self.cq_head).fetch_add(n, atomic::Ordering::Release);
        }
    }

    pub fn is_feature_single_mmap(&self) -> bool {
        self.features & sys::IORING_FEAT_SINGLE_MMAP != 0
    }

    /// Number of SQEs the kernel has had to drop due to invalid submission
    /// contents (never expected from this crate's fixed opcode set, but
    /// surfaced the way the teacher's `SubmissionQueue::dropped` exposes
    /// it, for callers instrumenting the loop).
    pub fn dropped(&self) -> u32 {
        unsafe { (*self.sq_dropped).load(atomic::Ordering::Acquire) }
    }
}

pub struct Completion {
    pub user_data: u64,
    pub res: i32,
}

pub struct CompletionIter<'a> {
    ring: &'a Ring,
    pos: u32,
    tail: u32,
}

impl<'a> Iterator for CompletionIter<'a> {
    type Item = Completion;

    fn next(&mut self) -> Option<Completion> {
        if self.pos == self.tail {
            return None;
        }
        let idx = (self.pos & self.ring.cq_ring_mask) as usize;
        let cqe = unsafe { &*self.ring.cqes.add(idx) };
        self.pos = self.pos.wrapping_add(1);
        Some(Completion {
            user_data: cqe.user_data,
            res: cqe.res,
        })
    }
}

impl Drop for Ring {
    fn drop(&mut self) {
        unsafe {
            ManuallyDrop::drop(&mut self.memory);
        }
    }
}
