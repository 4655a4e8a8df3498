//! The per-thread command-processing loop (spec §2 "Application thread",
//! §4.6, grounded in `examples/original_source/src/app_thread.cpp`).
//!
//! An `AppThread` is not `Send`/`Sync` by design — it, and every socket it
//! owns, live on exactly one OS thread (spec §1 "single-threaded core per
//! application thread"). Cross-thread interaction happens only through the
//! [`Dispatcher`] and each thread's own [`Signaler`].

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::time::{Duration, Instant};

use flux_utils::safe_assert;
use tracing::{debug, info};

use crate::dispatcher::{CommandKind, Dispatcher, PipeId, ThreadSlot};
use crate::signaler::{FdSignaler, SemSignaler, Signaler};
use crate::socket::RepSocket;
use crate::types::ThreadFlags;

/// Implemented by every socket pattern so an [`AppThread`] can route an
/// inbound [`Command`](crate::dispatcher::Command) to it without knowing the
/// concrete pattern type (spec §9 "virtual dispatch at the destination-object
/// level").
pub trait CommandSink {
    fn process_command(&mut self, target: PipeId, kind: CommandKind);
}

/// Below this interval between two non-blocking drains, `process_commands`
/// skips re-checking the signaler even when `throttle` is requested — the
/// original's RDTSC-gated fast path translated to a plain monotonic clock
/// read (see `DESIGN.md` for why `flux_timing::Instant`'s RDTSC machinery
/// wasn't worth pulling in for this one comparison).
const DEFAULT_MAX_COMMAND_DELAY: Duration = Duration::from_millis(1);

/// One application thread's registry of live sockets and its identity on the
/// command bus. Always held as `Rc<AppThread>`; sockets keep a `Weak` back
/// to it so they can unregister their own pipe ids on full detach without
/// keeping the thread alive (spec §9 "non-owning back-pointers").
pub struct AppThread {
    slot: ThreadSlot,
    dispatcher: Arc<Dispatcher>,
    signaler: Arc<dyn Signaler>,
    sockets: RefCell<Vec<Rc<RefCell<dyn CommandSink>>>>,
    registry: RefCell<HashMap<PipeId, Rc<RefCell<dyn CommandSink>>>>,
    last_processed: RefCell<Instant>,
    max_command_delay: Duration,
}

impl AppThread {
    /// Creates a new application thread with the default (semaphore-backed)
    /// signaler, registering it with the shared dispatcher under `slot` so
    /// peers on other threads can address it. Equivalent to
    /// `new_with_flags(dispatcher, slot, ThreadFlags::NONE)`.
    #[must_use]
    pub fn new(dispatcher: Arc<Dispatcher>, slot: ThreadSlot) -> Rc<Self> {
        Self::new_with_flags(dispatcher, slot, ThreadFlags::NONE)
    }

    /// Creates a new application thread, picking the signaler variant from
    /// `flags`: `ThreadFlags::POLL` selects the file-descriptor-backed
    /// [`FdSignaler`] so the thread's wakeup can be registered with an
    /// external poller; its absence selects [`SemSignaler`], the
    /// minimum-overhead default (spec §6 "Thread-creation flags").
    ///
    /// # Panics
    /// Panics if `ThreadFlags::POLL` is set and the underlying `pipe(2)`
    /// syscall fails (resource exhaustion).
    #[must_use]
    pub fn new_with_flags(dispatcher: Arc<Dispatcher>, slot: ThreadSlot, flags: ThreadFlags) -> Rc<Self> {
        let signaler: Arc<dyn Signaler> = if flags.contains(ThreadFlags::POLL) {
            Arc::new(FdSignaler::new().expect("failed to create fd signaler"))
        } else {
            Arc::new(SemSignaler::new())
        };
        dispatcher.register(slot, signaler.clone());
        info!(slot = slot.0, poll = flags.contains(ThreadFlags::POLL), "app thread registered with dispatcher");
        Rc::new(Self {
            slot,
            dispatcher,
            signaler,
            sockets: RefCell::new(Vec::new()),
            registry: RefCell::new(HashMap::new()),
            last_processed: RefCell::new(Instant::now()),
            max_command_delay: DEFAULT_MAX_COMMAND_DELAY,
        })
    }

    #[must_use]
    pub fn slot(&self) -> ThreadSlot {
        self.slot
    }

    #[must_use]
    pub fn signaler(&self) -> &Arc<dyn Signaler> {
        &self.signaler
    }

    /// `create_socket(ZMQ_REP)`: allocates a new REP socket bound to this
    /// thread and adds it to `sockets`.
    pub fn create_rep_socket(self: &Rc<Self>) -> Rc<RefCell<RepSocket>> {
        let socket = Rc::new(RefCell::new(RepSocket::with_app_thread(Rc::downgrade(self))));
        let erased: Rc<RefCell<dyn CommandSink>> = socket.clone();
        self.sockets.borrow_mut().push(erased);
        debug!(slot = self.slot.0, "rep socket created");
        socket
    }

    /// Binds one pipe's two ids to `socket` in the command-target registry
    /// and attaches the endpoints to it. Every pipe a socket owns must be
    /// registered this way or inbound commands addressed to it are silently
    /// dropped by `process_commands` (nothing resolves the target id).
    pub fn attach_pipe(
        &self,
        socket: &Rc<RefCell<RepSocket>>,
        reader: crate::pipe::Reader,
        writer: crate::pipe::Writer,
    ) {
        let erased: Rc<RefCell<dyn CommandSink>> = socket.clone();
        self.registry.borrow_mut().insert(reader.id(), erased.clone());
        self.registry.borrow_mut().insert(writer.id(), erased);
        socket.borrow_mut().xattach_pipes(reader, writer);
    }

    /// Called by a socket (through its `Weak<AppThread>`) once a pipe id is
    /// fully erased from its own pipe-set, so stale commands addressed to it
    /// can no longer resolve to a live socket.
    pub(crate) fn unregister_pipe(&self, id: PipeId) {
        self.registry.borrow_mut().remove(&id);
    }

    pub fn remove_socket(&self, socket: &Rc<RefCell<RepSocket>>) {
        let target = Rc::as_ptr(socket).cast::<()>();
        self.sockets.borrow_mut().retain(|s| Rc::as_ptr(s).cast::<()>() != target);
        debug!(slot = self.slot.0, "socket removed");
        if self.is_idle() {
            info!(slot = self.slot.0, "app thread has no sockets left, unregistering from dispatcher");
            self.dispatcher.unregister(self.slot);
        }
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.sockets.borrow().is_empty()
    }

    /// `process_commands(block, throttle)`. Three modes (spec §4.6):
    /// - `block = true`: sleeps on the signaler until a command arrives.
    /// - `block = false, throttle = true`: skips the non-blocking poll
    ///   entirely if less than `max_command_delay` has elapsed since the
    ///   last drain.
    /// - `block = false, throttle = false`: always does the non-blocking
    ///   poll.
    pub fn process_commands(&self, block: bool, throttle: bool) {
        let signals = if block {
            self.signaler.wait()
        } else {
            if throttle {
                let now = Instant::now();
                let mut last = self.last_processed.borrow_mut();
                if now.duration_since(*last) <= self.max_command_delay {
                    return;
                }
                *last = now;
            }
            self.signaler.poll()
        };

        if signals == 0 {
            return;
        }

        for i in 0..64u8 {
            if signals & (1u64 << i) == 0 {
                continue;
            }
            let from = ThreadSlot(i);
            for command in self.dispatcher.drain(self.slot, from) {
                let sink = self.registry.borrow().get(&command.target).cloned();
                match sink {
                    Some(sink) => sink.borrow_mut().process_command(command.target, command.kind),
                    // The target's pipe id was already unregistered (its peer
                    // raced the termination handshake); every command kind is
                    // idempotent against this, so dropping it is correct
                    // (spec §4.2 "Reordering safety").
                    None => safe_assert!(
                        matches!(
                            command.kind,
                            CommandKind::Revive
                                | CommandKind::ReaderInfo(_)
                                | CommandKind::PipeTerm
                                | CommandKind::PipeTermAck
                        ),
                        "unroutable command kind {:?} for unregistered pipe {}",
                        command.kind,
                        command.target
                    ),
                }
            }
        }
    }
}

impl Drop for AppThread {
    fn drop(&mut self) {
        safe_assert!(self.is_idle(), "app thread dropped with sockets still registered");
        self.dispatcher.unregister(self.slot);
        info!(slot = self.slot.0, "app thread teardown complete");
    }
}
