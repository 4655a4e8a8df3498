//! The writer half of a pipe: flow control, rollback, and the writer's side
//! of the termination handshake (spec §4.1 "Writer contract", §4.2).

use std::sync::Arc;

use crate::dispatcher::{Command, CommandKind, Dispatcher, PipeId, ThreadSlot};
use crate::message::Msg;
use crate::pipe::queue::Queue;

/// A writer endpoint. Flow control (`hwm`/`lwm`, `msgs_written`/`msgs_read`,
/// `stalled`) is local state (spec §3 "Endpoint counters"); cross-thread
/// notification to the peer reader goes through `dispatcher`. Pipe-set
/// bookkeeping (`xkill`/`xrevive`/`xdetach_*`) is the owning socket's
/// responsibility — methods here report what the caller should do via their
/// return value rather than holding a back-pointer into the socket (spec §9
/// "Non-owning back-pointers", translated here into caller-mediated state
/// rather than a stored callback).
pub struct Writer {
    id: PipeId,
    thread_slot: ThreadSlot,
    peer_id: PipeId,
    peer_slot: ThreadSlot,
    hwm: u64,
    lwm: u64,
    msgs_written: u64,
    msgs_read: u64,
    stalled: bool,
    peer_live: bool,
    queue: Arc<Queue>,
    dispatcher: Arc<Dispatcher>,
}

impl Writer {
    pub(crate) fn new(
        id: PipeId,
        thread_slot: ThreadSlot,
        peer_id: PipeId,
        peer_slot: ThreadSlot,
        hwm: u64,
        lwm: u64,
        queue: Arc<Queue>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        let lwm = if lwm == 0 || lwm > hwm { hwm } else { lwm };
        Self {
            id,
            thread_slot,
            peer_id,
            peer_slot,
            hwm,
            lwm,
            msgs_written: 0,
            msgs_read: 0,
            stalled: false,
            peer_live: true,
            queue,
            dispatcher,
        }
    }

    #[must_use]
    pub fn id(&self) -> PipeId {
        self.id
    }

    fn pipe_full(&self) -> bool {
        self.hwm > 0 && self.msgs_written - self.msgs_read == self.hwm
    }

    #[must_use]
    pub fn check_write(&mut self) -> bool {
        if self.pipe_full() {
            self.stalled = true;
            false
        } else {
            true
        }
    }

    /// Stages `msg`. On a full pipe, returns `msg` back to the caller
    /// unstaged so it can retry with the exact same frame (spec §4.5 "the
    /// application must retry with the same frame") — an out-param in the
    /// original would silently drop it, which a moved-from `Msg` cannot.
    pub fn write(&mut self, msg: Msg) -> Result<(), Msg> {
        if self.pipe_full() {
            self.stalled = true;
            return Err(msg);
        }
        let more = msg.is_more();
        self.queue.stage(msg);
        if !more {
            self.msgs_written += 1;
        }
        Ok(())
    }

    /// Discards the uncommitted tail of an in-progress multi-part message.
    /// Returns `true` if the caller should now call `xrevive(writer)` on its
    /// pipe-set (spec §4.1 "after rollback... notify the pipe-set").
    pub fn rollback(&mut self) -> bool {
        while let Some(msg) = self.queue.unstage() {
            if !msg.is_more() {
                self.queue.restage(msg);
                break;
            }
            // Frame had MORE set: drop it. Unfinished (MORE) frames never
            // incremented `msgs_written`, so there's no counter to undo.
        }
        if self.stalled && !self.pipe_full() {
            self.stalled = false;
            return true;
        }
        false
    }

    /// Publishes staged frames. Sends `revive` to the peer reader if the
    /// queue reports it couldn't wake it in-band (spec §4.1 "flush").
    pub fn flush(&mut self) {
        if self.queue.flush() {
            self.send_revive();
        }
    }

    fn send_revive(&self) {
        if !self.peer_live {
            return;
        }
        self.dispatcher.send(
            self.thread_slot,
            self.peer_slot,
            Command { target: self.peer_id, kind: CommandKind::Revive },
        );
    }

    /// Clears the endpoint binding, rolls back any unfinished message,
    /// writes the `DELIMITER`, and flushes. No further writes are permitted
    /// after this call (spec §4.1 "term").
    pub fn term(&mut self) {
        if !self.peer_live {
            return;
        }
        self.rollback();
        self.queue.stage(Msg::delimiter());
        self.queue.flush();
        self.peer_live = false;
    }

    /// Handles an inbound `ReaderInfo(n)`: the peer reader's credit update.
    /// A no-op if this writer has already terminated — a late `ReaderInfo`
    /// racing behind `term()` must be ignored rather than resurrecting
    /// `stalled` state for an endpoint that no longer writes (spec §4.2
    /// "a writer that has terminated ignores late reader_info"). Returns
    /// `true` if credit caught up and cleared the stall; REP treats
    /// `xrevive(writer)` as a no-op on the pipe-set partition regardless
    /// (spec §4.1 "Credit handshake", §9 "xrevive(writer) ... intentionally
    /// empty"), so callers only need this to decide whether to log/retry,
    /// not to touch the active/passive split.
    pub fn process_reader_info(&mut self, n: u64) -> bool {
        if !self.peer_live {
            return false;
        }
        self.msgs_read = n;
        if self.stalled {
            self.stalled = false;
            return true;
        }
        false
    }

    /// Handles an inbound `PipeTerm`: the peer reader initiated termination.
    /// Idempotent — a second call (reordering) is a no-op. Returns `true` if
    /// the caller should `xdetach_outpipe(writer)` (spec §4.2 step 2).
    pub fn process_pipe_term(&mut self) -> bool {
        if !self.peer_live {
            return false;
        }
        self.peer_live = false;
        self.dispatcher.send(
            self.thread_slot,
            self.peer_slot,
            Command { target: self.peer_id, kind: CommandKind::PipeTermAck },
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipe::new_pipe;

    fn writer_only(hwm: u64, lwm: u64) -> Writer {
        let dispatcher = Dispatcher::new();
        let (w, _r) =
            new_pipe(dispatcher, ThreadSlot(0), 1, ThreadSlot(1), 2, hwm, lwm);
        w
    }

    #[test]
    fn hwm_stalls_then_resumes_on_credit() {
        let mut w = writer_only(4, 2);
        for _ in 0..4 {
            assert!(w.write(Msg::new(b"m")).is_ok());
        }
        assert!(!w.check_write());
        let rejected = w.write(Msg::new(b"m"));
        assert_eq!(rejected.unwrap_err().data(), b"m");

        assert!(w.process_reader_info(2));
        assert!(w.check_write());
    }

    #[test]
    fn rollback_keeps_completed_message_counted() {
        let mut w = writer_only(10, 10);
        assert!(w.write(Msg::new(b"done")).is_ok());
        let mut more = Msg::new(b"partial");
        more.set_more(true);
        assert!(w.write(more).is_ok());
        w.rollback();
        w.flush();
        assert_eq!(w.msgs_written, 1);
    }

    #[test]
    fn term_is_idempotent() {
        let mut w = writer_only(4, 2);
        w.term();
        w.term();
    }

    #[test]
    fn late_reader_info_after_term_is_ignored() {
        let mut w = writer_only(4, 2);
        for _ in 0..4 {
            assert!(w.write(Msg::new(b"m")).is_ok());
        }
        assert!(!w.check_write());
        w.term();

        // A `ReaderInfo` that was already in flight when `term()` ran must
        // not resurrect `stalled` bookkeeping for a writer that no longer
        // writes.
        assert!(!w.process_reader_info(2));
        assert_eq!(w.msgs_read, 0);
    }
}
