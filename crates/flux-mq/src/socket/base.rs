//! The round-robin pipe-set shared by every socket pattern (spec §5 "Socket
//! base", §9 "Two parallel pipe sequences").
//!
//! `in_pipes`/`out_pipes` are kept in lockstep: index `i` in one always
//! names the same peer as index `i` in the other, even though a half can go
//! `None` independently when only one direction of a peer has terminated.
//! The prefix `[0, active)` is the "live" region a pattern round-robins
//! over; everything from `active` onward has been killed (no credit, or a
//! terminated reader) but isn't detached yet. `xkill`/`xrevive` move a peer
//! across that boundary with a single swap, so the active region never needs
//! a shift (spec §9 "active/passive partition").

use crate::dispatcher::PipeId;
use crate::pipe::{Reader, Writer};
use flux_utils::safe_assert;

pub(crate) struct PipeSet {
    in_pipes: Vec<Option<Reader>>,
    out_pipes: Vec<Option<Writer>>,
    active: usize,
    current: usize,
}

impl PipeSet {
    pub(crate) fn new() -> Self {
        Self { in_pipes: Vec::new(), out_pipes: Vec::new(), active: 0, current: 0 }
    }

    pub(crate) fn active(&self) -> usize {
        self.active
    }

    pub(crate) fn current(&self) -> usize {
        self.current
    }

    fn swap_both(&mut self, i: usize, j: usize) {
        self.in_pipes.swap(i, j);
        self.out_pipes.swap(i, j);
    }

    /// Resets `current` to 0 if it fell off the end of the (now possibly
    /// smaller) active region. Mirrors every `xkill`/`xdetach_*` site in the
    /// original pattern code, which repeats this same check inline. Callers
    /// that shrink `active` out from under `current` (e.g. `xrecv`'s
    /// empty-kill scan) must call this immediately after — `kill_at` itself
    /// does not, since some callers (e.g. `xhas_in`) advance `current`
    /// unconditionally instead.
    pub(crate) fn fix_current(&mut self) {
        if self.current >= self.active {
            self.current = 0;
        }
    }

    /// `xattach_pipes`: appends a new peer and folds it into the active
    /// region.
    pub(crate) fn attach(&mut self, reader: Reader, writer: Writer) {
        safe_assert!(self.in_pipes.len() == self.out_pipes.len());
        self.in_pipes.push(Some(reader));
        self.out_pipes.push(Some(writer));
        let last = self.in_pipes.len() - 1;
        self.swap_both(self.active, last);
        self.active += 1;
    }

    /// `xkill`: moves the peer at `index` (must be in the active region) to
    /// the passive region. Does not touch `current` — callers that scan the
    /// active region decide for themselves whether to advance past it.
    pub(crate) fn kill_at(&mut self, index: usize) {
        safe_assert!(index < self.active);
        self.active -= 1;
        self.swap_both(index, self.active);
    }

    /// `xrevive`: moves the peer at `index` (must be in the passive region)
    /// back into the active region.
    pub(crate) fn revive_at(&mut self, index: usize) {
        safe_assert!(index >= self.active);
        self.swap_both(index, self.active);
        self.active += 1;
    }

    /// Advances the round-robin cursor by one slot, wrapping on the current
    /// (possibly just-shrunk) active count. A no-op if nothing is active.
    pub(crate) fn advance_current(&mut self) {
        if self.active == 0 {
            self.current = 0;
            return;
        }
        self.current = (self.current + 1) % self.active;
    }

    /// `xdetach_inpipe`: the reader half at `index` is gone for good. If the
    /// writer half is still live, only the `in_pipes` slot is cleared and the
    /// peer drops out of the active region (if it was in it); if both halves
    /// are already gone, the peer is erased from both sequences entirely.
    /// Returns the pipe ids that are now fully gone from this pipe-set, for
    /// the caller to unregister from its command-target registry.
    ///
    /// `index` must be resolved by the caller via [`Self::index_of_in`]
    /// *before* any other pipe-set mutation in the same command-processing
    /// step — re-resolving it after an intervening swap can silently name a
    /// different peer (spec supplemented detail, original_source/rep.cpp).
    pub(crate) fn detach_inpipe(&mut self, index: usize) -> Vec<PipeId> {
        let in_id = self.in_pipes[index].as_ref().map(Reader::id);
        if self.out_pipes[index].is_some() {
            self.in_pipes[index] = None;
            if index < self.active {
                self.active -= 1;
                self.swap_both(index, self.active);
                self.fix_current();
            }
            return in_id.into_iter().collect();
        }
        let out_id = self.out_pipes[index].as_ref().map(Writer::id);
        if index < self.active {
            self.active -= 1;
            self.fix_current();
        }
        self.in_pipes.remove(index);
        self.out_pipes.remove(index);
        in_id.into_iter().chain(out_id).collect()
    }

    /// `xdetach_outpipe`: symmetric to [`Self::detach_inpipe`] for the writer
    /// half.
    pub(crate) fn detach_outpipe(&mut self, index: usize) -> Vec<PipeId> {
        let out_id = self.out_pipes[index].as_ref().map(Writer::id);
        if self.in_pipes[index].is_some() {
            self.out_pipes[index] = None;
            if index < self.active {
                self.active -= 1;
                self.swap_both(index, self.active);
                self.fix_current();
            }
            return out_id.into_iter().collect();
        }
        let in_id = self.in_pipes[index].as_ref().map(Reader::id);
        if index < self.active {
            self.active -= 1;
            self.fix_current();
        }
        self.in_pipes.remove(index);
        self.out_pipes.remove(index);
        out_id.into_iter().chain(in_id).collect()
    }

    pub(crate) fn index_of_in(&self, id: PipeId) -> Option<usize> {
        self.in_pipes.iter().position(|r| r.as_ref().is_some_and(|r| r.id() == id))
    }

    pub(crate) fn index_of_out(&self, id: PipeId) -> Option<usize> {
        self.out_pipes.iter().position(|w| w.as_ref().is_some_and(|w| w.id() == id))
    }

    pub(crate) fn reader_at_mut(&mut self, index: usize) -> Option<&mut Reader> {
        self.in_pipes[index].as_mut()
    }

    pub(crate) fn writer_at(&self, index: usize) -> Option<&Writer> {
        self.out_pipes[index].as_ref()
    }

    pub(crate) fn writer_at_mut(&mut self, index: usize) -> Option<&mut Writer> {
        self.out_pipes[index].as_mut()
    }
}
