//! The lock-free SPSC batched queue `Q` underlying a pipe (spec §3 "Pipe",
//! §4.1 "flush").
//!
//! Writes are staged into a writer-local buffer and only become visible to
//! the reader once [`Queue::flush`] publishes them. Grounded in the
//! ring-cursor SPSC pattern from
//! `examples/other_examples/...spsc-lamport-receiver.rs` (a single
//! `Acquire`/`Release` pair as the sole synchronization point) but built as
//! a chain of fixed-size blocks rather than one fixed ring: a pipe's HWM
//! bounds *messages*, not *frames*, so a multi-part message can stage more
//! frames than HWM without the underlying storage overflowing.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};

use crate::message::Msg;

/// Frames per block. Chosen so a typical single-frame request/reply workload
/// fills one block per direction without reallocating.
const BLOCK_LEN: usize = 64;

struct Block {
    slots: [UnsafeCell<MaybeUninit<Msg>>; BLOCK_LEN],
    next: AtomicPtr<Block>,
}

impl Block {
    fn new() -> *mut Self {
        Box::into_raw(Box::new(Self {
            slots: std::array::from_fn(|_| UnsafeCell::new(MaybeUninit::uninit())),
            next: AtomicPtr::new(std::ptr::null_mut()),
        }))
    }
}

/// Single-producer/single-consumer batched queue. `stage`/`unstage` are
/// writer-only and touch no shared state; `flush` publishes the staged
/// frames behind one `Release` store on `committed`; `try_read`/`has_visible`
/// are reader-only and synchronize with a single `Acquire` load.
///
/// # Safety
/// Correctness depends on the single-writer/single-reader discipline
/// documented on each method: writer-only methods must never be called from
/// the reader's thread and vice versa. This mirrors the contract
/// `flux-communication::queue::InnerQueue` places on its own `unsafe impl
/// Send/Sync`.
pub(crate) struct Queue {
    committed: AtomicUsize,
    empty_observed: AtomicBool,

    // Writer-only.
    staged: UnsafeCell<Vec<Msg>>,
    write_block: UnsafeCell<*mut Block>,
    write_idx: UnsafeCell<usize>,

    // Reader-only.
    read_block: UnsafeCell<*mut Block>,
    read_idx: UnsafeCell<usize>,
    read_total: UnsafeCell<usize>,
}

// SAFETY: writer fields are touched only by `stage`/`unstage`/`flush`
// (called from the writer's owning thread); reader fields only by
// `try_read`/`has_visible` (called from the reader's owning thread). The
// `committed`/`empty_observed` atomics are the sole cross-thread contact
// point.
unsafe impl Send for Queue {}
unsafe impl Sync for Queue {}

impl Queue {
    pub(crate) fn new() -> Self {
        let first = Block::new();
        Self {
            committed: AtomicUsize::new(0),
            empty_observed: AtomicBool::new(false),
            staged: UnsafeCell::new(Vec::new()),
            write_block: UnsafeCell::new(first),
            write_idx: UnsafeCell::new(0),
            read_block: UnsafeCell::new(first),
            read_idx: UnsafeCell::new(0),
            read_total: UnsafeCell::new(0),
        }
    }

    /// Writer-only. Appends `msg` to the not-yet-visible tail.
    pub(crate) fn stage(&self, msg: Msg) {
        // SAFETY: writer-only field, single writer thread.
        unsafe { (*self.staged.get()).push(msg) };
    }

    /// Writer-only. Pops the most recently staged, not-yet-flushed frame.
    pub(crate) fn unstage(&self) -> Option<Msg> {
        // SAFETY: writer-only field, single writer thread.
        unsafe { (*self.staged.get()).pop() }
    }

    /// Writer-only. Re-stages a frame popped by `unstage` (used by
    /// `rollback` to push back a complete message it shouldn't discard).
    pub(crate) fn restage(&self, msg: Msg) {
        self.stage(msg);
    }

    /// Writer-only. Publishes all staged frames in one `Release` store.
    /// Returns `true` if the reader had previously observed an empty queue
    /// (and therefore may be idle / needs an explicit `revive`).
    pub(crate) fn flush(&self) -> bool {
        // SAFETY: writer-only field, single writer thread.
        let staged = unsafe { &mut *self.staged.get() };
        if staged.is_empty() {
            return false;
        }
        let n = staged.len();
        for msg in staged.drain(..) {
            // SAFETY: writer-only fields, single writer thread.
            unsafe { self.push_block_slot(msg) };
        }
        self.committed.fetch_add(n, Ordering::Release);
        self.empty_observed.swap(false, Ordering::AcqRel)
    }

    /// SAFETY: caller holds the writer-only discipline.
    unsafe fn push_block_slot(&self, msg: Msg) {
        // SAFETY: writer-only fields, single writer thread.
        unsafe {
            let wb = &mut *self.write_block.get();
            let wi = &mut *self.write_idx.get();
            if *wi == BLOCK_LEN {
                let new_block = Block::new();
                (**wb).next.store(new_block, Ordering::Release);
                *wb = new_block;
                *wi = 0;
            }
            let slot = (**wb).slots.get_unchecked(*wi);
            (*slot.get()).write(msg);
            *wi += 1;
        }
    }

    /// Reader-only. Peeks without consuming.
    pub(crate) fn has_visible(&self) -> bool {
        // SAFETY: reader-only field, single reader thread.
        let read_total = unsafe { *self.read_total.get() };
        let visible = read_total < self.committed.load(Ordering::Acquire);
        if !visible {
            self.empty_observed.store(true, Ordering::Release);
        }
        visible
    }

    /// Reader-only. Consumes one visible frame, if any.
    pub(crate) fn try_read(&self) -> Option<Msg> {
        let committed = self.committed.load(Ordering::Acquire);
        // SAFETY: reader-only fields, single reader thread.
        unsafe {
            let read_total = *self.read_total.get();
            if read_total >= committed {
                self.empty_observed.store(true, Ordering::Release);
                return None;
            }

            let rb = &mut *self.read_block.get();
            let ri = &mut *self.read_idx.get();
            if *ri == BLOCK_LEN {
                let next = (**rb).next.load(Ordering::Acquire);
                debug_assert!(!next.is_null(), "reader outran committed frames");
                let old = *rb;
                *rb = next;
                *ri = 0;
                drop(Box::from_raw(old));
            }

            let slot = (**rb).slots.get_unchecked(*ri);
            let msg = (*slot.get()).assume_init_read();
            *ri += 1;
            *self.read_total.get() += 1;
            Some(msg)
        }
    }
}

impl Drop for Queue {
    fn drop(&mut self) {
        // Close every frame still visible to the reader, staged-but-unflushed
        // included, since `Msg` doesn't own its payload through a destructor
        // chain the pipe can rely on implicitly (spec §4.3).
        while self.try_read().is_some() {}
        // SAFETY: sole owner at drop time; no concurrent access remains.
        unsafe {
            let staged = &mut *self.staged.get();
            staged.clear();

            let mut block = *self.read_block.get();
            while !block.is_null() {
                let next = (*block).next.load(Ordering::Relaxed);
                drop(Box::from_raw(block));
                block = next;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invisible_until_flush() {
        let q = Queue::new();
        q.stage(Msg::new(b"a"));
        assert!(!q.has_visible());
        q.flush();
        assert!(q.has_visible());
        assert_eq!(q.try_read().unwrap().data(), b"a");
        assert!(!q.has_visible());
    }

    #[test]
    fn fifo_order_within_a_batch() {
        let q = Queue::new();
        q.stage(Msg::new(b"a"));
        q.stage(Msg::new(b"b"));
        q.stage(Msg::new(b"c"));
        q.flush();
        assert_eq!(q.try_read().unwrap().data(), b"a");
        assert_eq!(q.try_read().unwrap().data(), b"b");
        assert_eq!(q.try_read().unwrap().data(), b"c");
        assert!(q.try_read().is_none());
    }

    #[test]
    fn rollback_discards_only_the_uncommitted_tail() {
        let q = Queue::new();
        q.stage(Msg::new(b"committed"));
        q.flush();

        let mut first = Msg::new(b"a");
        first.set_more(true);
        q.stage(first);
        let mut second = Msg::new(b"b");
        second.set_more(true);
        q.stage(second);

        // Roll back: pop MORE frames, then stop.
        while let Some(m) = q.unstage() {
            if !m.is_more() {
                q.restage(m);
                break;
            }
        }
        q.flush();

        assert_eq!(q.try_read().unwrap().data(), b"committed");
        assert!(q.try_read().is_none());
    }

    #[test]
    fn crosses_block_boundary() {
        let q = Queue::new();
        for i in 0..(BLOCK_LEN * 3 + 5) {
            q.stage(Msg::new(&(i as u32).to_le_bytes()));
        }
        q.flush();
        for i in 0..(BLOCK_LEN * 3 + 5) {
            let msg = q.try_read().unwrap();
            assert_eq!(msg.data(), (i as u32).to_le_bytes());
        }
        assert!(q.try_read().is_none());
    }

    #[test]
    fn empty_observed_hint_round_trips() {
        let q = Queue::new();
        // Reader observes empty before anything is written.
        assert!(q.try_read().is_none());
        q.stage(Msg::new(b"x"));
        let needs_revive = q.flush();
        assert!(needs_revive, "reader had stalled, writer must nudge it");

        q.stage(Msg::new(b"y"));
        let needs_revive = q.flush();
        assert!(!needs_revive, "reader hadn't caught up, no nudge needed");
    }

    #[test]
    fn drop_closes_visible_and_staged_frames() {
        let q = Queue::new();
        q.stage(Msg::new(b"visible"));
        q.flush();
        q.stage(Msg::new(b"staged-only"));
        drop(q);
    }
}
