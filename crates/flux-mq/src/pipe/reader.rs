//! The reader half of a pipe: credit accounting and the reader's side of
//! the termination handshake (spec §4.1 "Reader contract", §4.2).

use std::sync::Arc;

use tracing::debug;

use crate::dispatcher::{Command, CommandKind, Dispatcher, PipeId, ThreadSlot};
use crate::message::Msg;
use crate::pipe::queue::Queue;

/// Outcome of [`Reader::read`]. `Terminated` means the frame dequeued was
/// the `DELIMITER` sentinel; the caller must `xdetach_inpipe(reader)` on its
/// pipe-set (the reader has already sent `pipe_term` to its peer — spec
/// §4.1 "read").
pub enum ReadOutcome {
    Delivered(Msg),
    Empty,
    Terminated,
}

/// A reader endpoint. See [`crate::pipe::writer::Writer`] for the rationale
/// behind returning pipe-set actions to the caller instead of holding a
/// back-pointer into the owning socket.
pub struct Reader {
    id: PipeId,
    thread_slot: ThreadSlot,
    peer_id: PipeId,
    peer_slot: ThreadSlot,
    lwm: u64,
    msgs_read: u64,
    peer_live: bool,
    queue: Arc<Queue>,
    dispatcher: Arc<Dispatcher>,
}

impl Reader {
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
            lwm,
            msgs_read: 0,
            peer_live: true,
            queue,
            dispatcher,
        }
    }

    #[must_use]
    pub fn id(&self) -> PipeId {
        self.id
    }

    /// Peeks for a visible frame. The caller should `xkill(reader)` on
    /// `false` (spec §4.1 "check_read").
    #[must_use]
    pub fn check_read(&self) -> bool {
        self.queue.has_visible()
    }

    /// Dequeues one frame. On [`ReadOutcome::Empty`] the caller should
    /// `xkill(reader)`; on [`ReadOutcome::Terminated`] the caller should
    /// `xdetach_inpipe(reader)` (spec §4.1 "read").
    pub fn read(&mut self) -> ReadOutcome {
        match self.queue.try_read() {
            None => ReadOutcome::Empty,
            Some(msg) if msg.is_delimiter() => {
                self.term();
                ReadOutcome::Terminated
            }
            Some(msg) => {
                if !msg.is_more() {
                    self.msgs_read += 1;
                    if self.lwm > 0 && self.msgs_read % self.lwm == 0 {
                        self.send_reader_info();
                    }
                }
                ReadOutcome::Delivered(msg)
            }
        }
    }

    fn send_reader_info(&self) {
        if !self.peer_live {
            return;
        }
        self.dispatcher.send(
            self.thread_slot,
            self.peer_slot,
            Command { target: self.peer_id, kind: CommandKind::ReaderInfo(self.msgs_read) },
        );
    }

    /// Sends `pipe_term` to the peer writer and clears the endpoint binding.
    /// Idempotent (spec §4.2 "Idempotent termination").
    pub fn term(&mut self) {
        if !self.peer_live {
            return;
        }
        self.peer_live = false;
        self.dispatcher.send(
            self.thread_slot,
            self.peer_slot,
            Command { target: self.peer_id, kind: CommandKind::PipeTerm },
        );
    }

    /// Handles an inbound `revive`. A no-op by construction once this
    /// reader's pipe-set binding is gone — the caller only reaches this
    /// method through a still-registered command target (spec §4.2
    /// "Reordering safety"). Returns `true` to tell the caller to
    /// `xrevive(reader)`.
    #[must_use]
    pub fn process_revive(&self) -> bool {
        true
    }

    /// Handles an inbound `pipe_term_ack`: the final step of the
    /// termination handshake. The pipe itself is reclaimed when the caller
    /// drops this `Reader`'s `Arc<Queue>` handle (spec §4.2 step 3, §4.3).
    pub fn process_pipe_term_ack(&mut self) {
        self.peer_live = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipe::new_pipe;

    #[test]
    fn credit_sent_every_lwm_messages() {
        let dispatcher = Dispatcher::new();
        let a = ThreadSlot(0);
        let b = ThreadSlot(1);
        let (mut w, mut r) = new_pipe(dispatcher.clone(), a, 1, b, 2, 10, 2);

        for i in 0..4u8 {
            assert!(w.write(Msg::new(&[i])).is_ok());
        }
        w.flush();

        for _ in 0..2 {
            assert!(matches!(r.read(), ReadOutcome::Delivered(_)));
        }
        let drained = dispatcher.drain(a, b);
        assert_eq!(drained.len(), 1);
        assert!(matches!(drained[0].kind, CommandKind::ReaderInfo(2)));
    }

    #[test]
    fn delimiter_ends_stream_and_signals_termination() {
        let dispatcher = Dispatcher::new();
        let a = ThreadSlot(0);
        let b = ThreadSlot(1);
        let (mut w, mut r) = new_pipe(dispatcher.clone(), a, 1, b, 2, 10, 10);
        w.term();

        assert!(matches!(r.read(), ReadOutcome::Terminated));
        let drained = dispatcher.drain(a, b);
        assert_eq!(drained.len(), 1);
        assert!(matches!(drained[0].kind, CommandKind::PipeTerm));
    }
}
