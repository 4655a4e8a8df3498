//! Edge-triggered, single-writer/single-reader wakeup carrying a 64-bit
//! set-of-slots payload (spec §2.1, §5, §6 "Thread-creation flags").
//!
//! Two variants: [`FdSignaler`] (a self-pipe, for integration with an
//! external poller under `ThreadFlags::POLL`) and [`SemSignaler`] (a POSIX
//! semaphore, minimum overhead, the default). Both route the actual payload
//! through the same `AtomicU64` bitmask; the OS primitive only carries the
//! "something changed, go look" edge.

use std::os::fd::RawFd;
use std::sync::atomic::{AtomicU64, Ordering};

use flux_utils::safe_assert;

/// A per-thread wakeup: `raise` sets bits and wakes the waiter; `wait`
/// blocks until at least one bit is set and returns (and clears) the whole
/// mask; `poll` is the non-blocking equivalent used by the throttled/peek
/// drain modes (spec §4.6).
pub trait Signaler: Send + Sync {
    /// Sets bit `slot` in the mask and wakes a blocked waiter, if any.
    fn raise(&self, slot: u8);

    /// Blocks until the mask is non-zero, then returns and clears it.
    fn wait(&self) -> u64;

    /// Returns and clears the current mask without blocking.
    fn poll(&self) -> u64;
}

fn raise_bit(mask: &AtomicU64, slot: u8) -> u64 {
    safe_assert!(slot < 64, "signaler slot {} out of range", slot);
    mask.fetch_or(1u64 << slot, Ordering::AcqRel)
}

fn take_mask(mask: &AtomicU64) -> u64 {
    mask.swap(0, Ordering::AcqRel)
}

/// File-descriptor-backed signaler built on a self-pipe: a byte is written
/// to wake a reader blocked in `poll(2)` on the read end, which is also the
/// fd an external event loop can register directly.
pub struct FdSignaler {
    read_fd: RawFd,
    write_fd: RawFd,
    mask: AtomicU64,
}

impl FdSignaler {
    /// # Errors
    /// Returns the raw `errno` if the underlying `pipe(2)` syscall fails.
    pub fn new() -> std::io::Result<Self> {
        let mut fds = [0 as RawFd; 2];
        // SAFETY: `fds` is a valid pointer to two ints, as required by pipe(2).
        let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
        if rc != 0 {
            return Err(std::io::Error::last_os_error());
        }
        // SAFETY: fds[0] was just returned as a valid, open fd by pipe(2).
        unsafe {
            set_nonblocking(fds[0]);
            set_nonblocking(fds[1]);
        }
        Ok(Self { read_fd: fds[0], write_fd: fds[1], mask: AtomicU64::new(0) })
    }

    /// The fd an external poller should register for readability.
    #[must_use]
    pub const fn pollable_fd(&self) -> RawFd {
        self.read_fd
    }

    fn drain_wakeup_byte(&self) {
        let mut buf = [0u8; 64];
        loop {
            // SAFETY: read_fd is open for the lifetime of `self`; buf is a
            // valid, appropriately-sized buffer.
            let n = unsafe {
                libc::read(self.read_fd, buf.as_mut_ptr().cast(), buf.len())
            };
            if n <= 0 {
                break;
            }
        }
    }
}

impl Signaler for FdSignaler {
    fn raise(&self, slot: u8) {
        let prev = raise_bit(&self.mask, slot);
        if prev == 0 {
            let byte = 1u8;
            // SAFETY: write_fd is open for the lifetime of `self`.
            unsafe {
                libc::write(self.write_fd, std::ptr::addr_of!(byte).cast(), 1);
            }
        }
    }

    fn wait(&self) -> u64 {
        loop {
            let mask = take_mask(&self.mask);
            if mask != 0 {
                self.drain_wakeup_byte();
                return mask;
            }
            let mut pfd =
                libc::pollfd { fd: self.read_fd, events: libc::POLLIN, revents: 0 };
            // SAFETY: pfd is a valid single-element pollfd array.
            unsafe {
                libc::poll(std::ptr::addr_of_mut!(pfd), 1, -1);
            }
        }
    }

    fn poll(&self) -> u64 {
        take_mask(&self.mask)
    }
}

impl Drop for FdSignaler {
    fn drop(&mut self) {
        // SAFETY: both fds were opened by this struct and are not shared.
        unsafe {
            libc::close(self.read_fd);
            libc::close(self.write_fd);
        }
    }
}

unsafe fn set_nonblocking(fd: RawFd) {
    // SAFETY: fd is a valid, open file descriptor.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL, 0) };
    if flags >= 0 {
        // SAFETY: fd is valid; flags is a value previously read from it.
        unsafe {
            libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
        }
    }
}

/// POSIX-semaphore-backed signaler, the default when `ThreadFlags::POLL` is
/// not requested. Minimum overhead: no fd, no syscall on the fast path when
/// the mask is already non-zero.
pub struct SemSignaler {
    sem: std::cell::UnsafeCell<libc::sem_t>,
    mask: AtomicU64,
}

// SAFETY: `sem_t` is accessed only through the POSIX semaphore API, which is
// documented to be safe for concurrent use from multiple threads.
unsafe impl Send for SemSignaler {}
unsafe impl Sync for SemSignaler {}

impl SemSignaler {
    /// # Panics
    /// Panics if `sem_init` fails (indicates resource exhaustion or a
    /// platform that doesn't support unnamed semaphores).
    #[must_use]
    pub fn new() -> Self {
        let sem = std::cell::UnsafeCell::new(unsafe { std::mem::zeroed() });
        // SAFETY: `sem` was just allocated and is not yet used by anyone.
        let rc = unsafe { libc::sem_init(sem.get(), 0, 0) };
        assert!(rc == 0, "sem_init failed: {}", std::io::Error::last_os_error());
        Self { sem, mask: AtomicU64::new(0) }
    }
}

impl Default for SemSignaler {
    fn default() -> Self {
        Self::new()
    }
}

impl Signaler for SemSignaler {
    fn raise(&self, slot: u8) {
        let prev = raise_bit(&self.mask, slot);
        if prev == 0 {
            // SAFETY: `sem` is initialized in `new` and outlives this call.
            unsafe {
                libc::sem_post(self.sem.get());
            }
        }
    }

    fn wait(&self) -> u64 {
        loop {
            let mask = take_mask(&self.mask);
            if mask != 0 {
                return mask;
            }
            // SAFETY: `sem` is initialized in `new` and outlives this call.
            unsafe {
                libc::sem_wait(self.sem.get());
            }
        }
    }

    fn poll(&self) -> u64 {
        take_mask(&self.mask)
    }
}

impl Drop for SemSignaler {
    fn drop(&mut self) {
        // SAFETY: `sem` is initialized in `new` and no other thread can be
        // waiting on it once the owning AppThread is being torn down.
        unsafe {
            libc::sem_destroy(self.sem.get());
        }
    }
}
