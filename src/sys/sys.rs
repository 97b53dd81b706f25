// Hand-vendored subset of `<linux/io_uring.h>`, checked in the same way
// `linux-io-uring-sys` checks in a bindgen-generated `sys.rs` for the
// non-bindgen build path. Only the pieces `ring.rs` touches are kept.

pub const IORING_OFF_SQ_RING: u64 = 0;
pub const IORING_OFF_CQ_RING: u64 = 0x8000000;
pub const IORING_OFF_SQES: u64 = 0x10000000;

pub const IORING_FEAT_SINGLE_MMAP: u32 = 1 << 0;
pub const IORING_FEAT_NODROP: u32 = 1 << 1;

pub const IORING_ENTER_GETEVENTS: u32 = 1 << 0;
pub const IORING_ENTER_SQ_WAKEUP: u32 = 1 << 1;

pub const IORING_SQ_NEED_WAKEUP: u32 = 1 << 0;
pub const IORING_SQ_CQ_OVERFLOW: u32 = 1 << 1;

pub const IORING_OP_POLL_ADD: u8 = 6;
pub const IORING_OP_POLL_REMOVE: u8 = 7;
pub const IORING_OP_TIMEOUT: u8 = 11;

/// Reserved `user_data` value the engine stamps on its own internal
/// bounding `IORING_OP_TIMEOUT` submission (see `ring::Ring::wait`). Never
/// produced by a real watcher token, which is always `(slot, generation)`
/// packed from a live slab index.
pub const LIBURING_UDATA_TIMEOUT: u64 = u64::MAX;

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct io_sqring_offsets {
    pub head: u32,
    pub tail: u32,
    pub ring_mask: u32,
    pub ring_entries: u32,
    pub flags: u32,
    pub dropped: u32,
    pub array: u32,
    pub resv1: u32,
    pub resv2: u64,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct io_cqring_offsets {
    pub head: u32,
    pub tail: u32,
    pub ring_mask: u32,
    pub ring_entries: u32,
    pub overflow: u32,
    pub cqes: u32,
    pub flags: u32,
    pub resv1: u32,
    pub resv2: u64,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct io_uring_params {
    pub sq_entries: u32,
    pub cq_entries: u32,
    pub flags: u32,
    pub sq_thread_cpu: u32,
    pub sq_thread_idle: u32,
    pub features: u32,
    pub wq_fd: u32,
    pub resv: [u32; 3],
    pub sq_off: io_sqring_offsets,
    pub cq_off: io_cqring_offsets,
}

/// A submission queue entry. Only the fields `POLL_ADD`/`POLL_REMOVE`/
/// `TIMEOUT` use are named; the rest of the kernel's anonymous unions
/// collapse into `__pad2`, matching how those opcodes leave them unused.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct io_uring_sqe {
    pub opcode: u8,
    pub flags: u8,
    pub ioprio: u16,
    pub fd: i32,
    pub off: u64,
    pub addr: u64,
    pub len: u32,
    /// `poll32_events` for `POLL_ADD`, `timeout_flags` for `TIMEOUT`,
    /// unused (zeroed) for `POLL_REMOVE`.
    pub op_flags: u32,
    pub user_data: u64,
    pub buf_index: u16,
    pub personality: u16,
    pub splice_fd_in: i32,
    pub __pad2: [u64; 2],
}

impl Default for io_uring_sqe {
    fn default() -> Self {
        // SAFETY: an all-zero SQE is a valid (no-op shaped) representation.
        unsafe { std::mem::zeroed() }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct io_uring_cqe {
    pub user_data: u64,
    pub res: i32,
    pub flags: u32,
}

/// `<linux/time_types.h>`'s `__kernel_timespec`: the 64-bit-everywhere
/// timespec the io_uring ABI uses instead of libc's (which is 32-bit
/// `tv_sec` on some 32-bit targets).
#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct __kernel_timespec {
    pub tv_sec: i64,
    pub tv_nsec: i64,
}
