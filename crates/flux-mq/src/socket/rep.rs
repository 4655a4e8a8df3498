//! The REP socket pattern: strict request/reply alternation over a
//! round-robin peer set (spec §5 "REP", grounded in
//! `examples/original_source/src/rep.cpp`).

use std::rc::Weak;

use flux_utils::safe_assert;

use crate::app_thread::{AppThread, CommandSink};
use crate::dispatcher::{CommandKind, PipeId};
use crate::error::{RecvError, SendError, SocketOptionError};
use crate::message::Msg;
use crate::pipe::{ReadOutcome, Reader, Writer};
use crate::socket::base::PipeSet;

/// `Idle ⇄ Receiving ⇄ Replying`. `more` doubles as "a multi-part request is
/// still arriving" while `!sending_reply`, and as "a multi-part reply is
/// still going out" while `sending_reply` — only one of the two is ever
/// true at once, since REP never reads ahead of a pending reply.
pub struct RepSocket {
    pipes: PipeSet,
    sending_reply: bool,
    more: bool,
    /// The peer the in-flight reply is addressed to, named by its `Writer`'s
    /// stable id rather than a pipe-set index: an unrelated `xkill`/`xrevive`
    /// elsewhere in the set can swap array slots around mid-reply, but a
    /// `PipeId` survives that (spec §9, Design Notes "non-owning
    /// back-pointers" applied to this field too).
    reply_pipe: Option<PipeId>,
    /// Back-pointer used only to unregister fully-erased pipe ids from the
    /// owning app thread's command-target registry (spec §9 "non-owning
    /// back-pointers"); `Weak` so a socket never keeps its app thread alive.
    app_thread: Weak<AppThread>,
}

impl RepSocket {
    #[must_use]
    pub fn new() -> Self {
        Self {
            pipes: PipeSet::new(),
            sending_reply: false,
            more: false,
            reply_pipe: None,
            app_thread: Weak::new(),
        }
    }

    pub(crate) fn with_app_thread(app_thread: Weak<AppThread>) -> Self {
        Self { app_thread, ..Self::new() }
    }

    fn unregister_freed(&self, freed: Vec<PipeId>) {
        if freed.is_empty() {
            return;
        }
        if let Some(app) = self.app_thread.upgrade() {
            for id in freed {
                app.unregister_pipe(id);
            }
        }
    }

    /// `xattach_pipes`.
    pub fn xattach_pipes(&mut self, reader: Reader, writer: Writer) {
        self.pipes.attach(reader, writer);
    }

    /// `xsetsockopt`: REP exposes no options of its own.
    pub fn xsetsockopt(&mut self, _option: i32, _value: &[u8]) -> Result<(), SocketOptionError> {
        Err(SocketOptionError::Invalid)
    }

    /// `xrecv`. Round-robins the active region starting at `current`,
    /// killing any peer whose queue is empty or whose stream just ended, and
    /// retrying the same slot (which the kill swap has just repopulated)
    /// before moving on — mirroring the original's count-bounded loop that
    /// never advances `current` on a failed attempt, relying on the in-place
    /// swap to present a different candidate at the same index next time.
    /// That in-place swap is a no-op when `cur` is the last active slot
    /// (`cur == active - 1`), so `current` can be left pointing one past the
    /// shrunk active region; `fix_current` resets it to 0 in that case, the
    /// same way every other shrink site in the pipe-set does.
    pub fn xrecv(&mut self) -> Result<Msg, RecvError> {
        if self.sending_reply {
            return Err(RecvError::Fsm);
        }

        // Continuing a multi-part request: the remaining frames must come
        // from the same peer, not whichever one the round-robin scan would
        // try next. A failed read here is an implementation bug, never a
        // runtime condition (`rep.cpp`: `zmq_assert(!(more && !fetched))`).
        if self.more {
            let cur = self.pipes.current();
            let reader = self
                .pipes
                .reader_at_mut(cur)
                .expect("a peer mid multi-part request is always still the current live reader");
            return match reader.read() {
                ReadOutcome::Delivered(msg) => {
                    let more = msg.is_more();
                    self.more = more;
                    if !more {
                        self.reply_pipe = self.pipes.writer_at(cur).map(Writer::id);
                        self.sending_reply = true;
                        self.pipes.advance_current();
                    }
                    Ok(msg)
                }
                ReadOutcome::Empty => {
                    safe_assert!(false, "peer starved mid multi-part request");
                    Err(RecvError::WouldBlock)
                }
                ReadOutcome::Terminated => {
                    safe_assert!(false, "peer terminated mid multi-part request");
                    let freed = self.pipes.detach_inpipe(cur);
                    self.unregister_freed(freed);
                    Err(RecvError::WouldBlock)
                }
            };
        }

        let mut count = self.pipes.active();
        while count != 0 {
            count -= 1;
            if self.pipes.active() == 0 {
                break;
            }
            let cur = self.pipes.current();
            let reader =
                self.pipes.reader_at_mut(cur).expect("index < active always names a live reader");
            match reader.read() {
                ReadOutcome::Delivered(msg) => {
                    let more = msg.is_more();
                    self.more = more;
                    if !more {
                        self.reply_pipe = self.pipes.writer_at(cur).map(Writer::id);
                        self.sending_reply = true;
                        self.pipes.advance_current();
                    }
                    return Ok(msg);
                }
                ReadOutcome::Empty => {
                    self.pipes.kill_at(cur);
                    self.pipes.fix_current();
                }
                ReadOutcome::Terminated => {
                    let freed = self.pipes.detach_inpipe(cur);
                    self.unregister_freed(freed);
                }
            }
        }
        Err(RecvError::WouldBlock)
    }

    /// `xsend`. If the peer the reply is addressed to has since disappeared
    /// (its pipe-id no longer resolves), the frame is dropped silently and
    /// the state machine still advances as though delivery happened — a
    /// vanished requester is not the replier's error to report (spec §5
    /// "peer disappearance mid-reply").
    pub fn xsend(&mut self, msg: Msg) -> Result<(), (SendError, Msg)> {
        if !self.sending_reply {
            return Err((SendError::Fsm, msg));
        }

        let more = msg.is_more();
        if let Some(id) = self.reply_pipe {
            if let Some(idx) = self.pipes.index_of_out(id) {
                let writer = self.pipes.writer_at_mut(idx).expect("resolved index is always live");
                if let Err(msg) = writer.write(msg) {
                    return Err((SendError::WouldBlock, msg));
                }
                if !more {
                    writer.flush();
                }
            }
        }

        self.more = more;
        if !more {
            self.sending_reply = false;
            self.reply_pipe = None;
        }
        Ok(())
    }

    /// `xhas_in`. False outright while a reply is pending (REP never reads
    /// ahead of its own reply). A multi-part request still arriving is
    /// reported ready without touching the pipe-set; otherwise scans the
    /// active region like `xrecv`, but (unlike `xrecv`) always advances
    /// `current` past a failed candidate — it has no frame to return, so
    /// there is nothing to retry against the now-repopulated slot this call
    /// (spec-supplemented detail, `original_source/rep.cpp`).
    pub fn xhas_in(&mut self) -> bool {
        if self.sending_reply {
            return false;
        }
        if self.more {
            return true;
        }

        let mut count = self.pipes.active();
        while count != 0 {
            count -= 1;
            if self.pipes.active() == 0 {
                break;
            }
            let cur = self.pipes.current();
            let ready = self
                .pipes
                .reader_at_mut(cur)
                .expect("index < active always names a live reader")
                .check_read();
            if ready {
                return true;
            }
            self.pipes.kill_at(cur);
            self.pipes.advance_current();
        }
        false
    }

    /// `xhas_out`: only while a reply is in flight.
    #[must_use]
    pub fn xhas_out(&self) -> bool {
        self.sending_reply
    }
}

impl Default for RepSocket {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandSink for RepSocket {
    fn process_command(&mut self, target: PipeId, kind: CommandKind) {
        match kind {
            CommandKind::Revive => {
                if let Some(idx) = self.pipes.index_of_in(target) {
                    let revive =
                        self.pipes.reader_at_mut(idx).expect("just resolved").process_revive();
                    safe_assert!(revive, "reader revive is unconditional by construction");
                    self.pipes.revive_at(idx);
                }
            }
            CommandKind::ReaderInfo(n) => {
                // `xrevive(writer)` is a no-op for REP (spec §4.4, §9):
                // write-availability is only ever consulted via `reply_pipe`
                // at `xsend` time, never by promoting a slot in the
                // pipe-set's active/passive partition. A writer can be
                // stalled while its twin reader is still in the active
                // region, so running it through `revive_at` (which asserts
                // `index >= active`) would panic.
                if let Some(idx) = self.pipes.index_of_out(target) {
                    self.pipes.writer_at_mut(idx).expect("just resolved").process_reader_info(n);
                }
            }
            CommandKind::PipeTerm => {
                if let Some(idx) = self.pipes.index_of_out(target) {
                    let detach =
                        self.pipes.writer_at_mut(idx).expect("just resolved").process_pipe_term();
                    if detach {
                        let freed = self.pipes.detach_outpipe(idx);
                        self.unregister_freed(freed);
                    }
                }
            }
            CommandKind::PipeTermAck => {
                if let Some(idx) = self.pipes.index_of_in(target) {
                    self.pipes.reader_at_mut(idx).expect("just resolved").process_pipe_term_ack();
                    let freed = self.pipes.detach_inpipe(idx);
                    self.unregister_freed(freed);
                }
            }
        }
    }
}
