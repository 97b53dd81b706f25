//! Small helpers shared by `ring.rs`: an owned fd and an owned mmap
//! region, plus the couple of pointer tricks the ring buffers need.

use core::ptr;
use core::sync::atomic;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};

/// An owned file descriptor, closed on drop.
pub struct Fd(RawFd);

impl Fd {
    pub fn new(fd: RawFd) -> Fd {
        Fd(fd)
    }
}

impl AsRawFd for Fd {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

impl Drop for Fd {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.0);
        }
    }
}

/// A region of memory mapped using `mmap(2)`.
pub struct Mmap {
    addr: ptr::NonNull<libc::c_void>,
    len: usize,
}

impl Mmap {
    /// Map `len` bytes starting from the offset `offset` in the file descriptor `fd` into memory.
    pub fn new(fd: &Fd, offset: libc::off_t, len: usize) -> io::Result<Mmap> {
        unsafe {
            let addr = libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_POPULATE,
                fd.as_raw_fd(),
                offset,
            );

            if addr == libc::MAP_FAILED {
                return Err(io::Error::last_os_error());
            }

            // mmap(2) never returns null on success.
            let addr = ptr::NonNull::new_unchecked(addr);
            Ok(Mmap { addr, len })
        }
    }

    /// Get a pointer to the memory.
    #[inline]
    pub fn as_mut_ptr(&self) -> *mut libc::c_void {
        self.addr.as_ptr()
    }

    /// Get a pointer to the data at the given offset.
    #[inline]
    pub unsafe fn offset(&self, offset: u32) -> *mut libc::c_void {
        self.as_mut_ptr().add(offset as usize)
    }
}

impl Drop for Mmap {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.addr.as_ptr(), self.len);
        }
    }
}

#[inline(always)]
pub unsafe fn unsync_load(u: *const atomic::AtomicU32) -> u32 {
    *u.cast::<u32>()
}

#[inline]
pub const fn cast_ptr<T>(n: &T) -> *const T {
    n
}
