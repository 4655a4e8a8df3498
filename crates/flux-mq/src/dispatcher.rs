//! The cross-thread command bus (spec §2 "Command bus", §5, §6 "Command
//! kinds", §9 "Cross-thread control messages").
//!
//! Sockets and pipe endpoints never call each other's methods across
//! threads; they enqueue a [`Command`] into this process-wide dispatcher,
//! keyed by the `(source, destination)` thread-slot pair, and raise one bit
//! in the destination's signaler. The destination thread's own
//! `process_commands` loop dequeues and dispatches locally — this is the
//! only cross-thread mutation channel into the core (spec §5).

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::signaler::Signaler;

/// Identifies a single pipe endpoint (a `Reader` or a `Writer`) so that a
/// [`Command`] — which must be `Send` and therefore cannot carry the
/// thread-local `Rc<RefCell<_>>` handle to the endpoint itself — can name
/// its target. The destination `AppThread` resolves this id against its own
/// thread-local registry when draining (see `app_thread::AppThread`).
pub type PipeId = u64;

static NEXT_PIPE_ID: AtomicU64 = AtomicU64::new(1);

/// Allocates a process-wide unique id for a new pipe endpoint.
pub fn next_pipe_id() -> PipeId {
    NEXT_PIPE_ID.fetch_add(1, Ordering::Relaxed)
}

/// A thread's address on the command bus. Doubles as the bit index (`0..64`)
/// the owning thread's signaler raises when it has a command waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadSlot(pub u8);

/// Closed set of cross-thread control messages (spec §6, §9). `attach` and
/// `detach` commands, which originate from session objects, are out of
/// scope (spec §1) and are not modeled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// Sent by a writer (via pipe flush) or by a socket's `xrevive`-adjacent
    /// logic to prompt a killed reader/writer back into its pipe-set.
    Revive,
    /// Writer-side credit update: `msgs_read` observed by the peer reader.
    ReaderInfo(u64),
    /// Initiates one step of the four-step termination handshake (spec
    /// §4.2).
    PipeTerm,
    /// Final step of the termination handshake; the recipient destroys the
    /// pipe.
    PipeTermAck,
}

/// A command addressed to a specific pipe endpoint on the destination
/// thread.
#[derive(Debug, Clone, Copy)]
pub struct Command {
    pub target: PipeId,
    pub kind: CommandKind,
}

/// Per-(source, destination) queues plus the registry of signalers used to
/// wake a destination thread. One instance is shared (`Arc`) by every
/// `AppThread` in the process.
pub struct Dispatcher {
    queues: Mutex<HashMap<(ThreadSlot, ThreadSlot), VecDeque<Command>>>,
    signalers: Mutex<HashMap<ThreadSlot, Arc<dyn Signaler>>>,
}

impl Dispatcher {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self { queues: Mutex::new(HashMap::new()), signalers: Mutex::new(HashMap::new()) })
    }

    /// Registers the signaler a thread should be woken through. Must be
    /// called once, before any command is sent to that slot.
    pub fn register(&self, slot: ThreadSlot, signaler: Arc<dyn Signaler>) {
        self.signalers.lock().unwrap().insert(slot, signaler);
    }

    pub fn unregister(&self, slot: ThreadSlot) {
        self.signalers.lock().unwrap().remove(&slot);
    }

    /// Enqueues `command` on the `(from, to)` queue and raises bit `from` on
    /// `to`'s signaler. Delivery is reliable and ordered per (source,
    /// destination) pair (spec §6).
    pub fn send(&self, from: ThreadSlot, to: ThreadSlot, command: Command) {
        {
            let mut queues = self.queues.lock().unwrap();
            queues.entry((from, to)).or_default().push_back(command);
        }
        if let Some(signaler) = self.signalers.lock().unwrap().get(&to) {
            signaler.raise(from.0);
        }
    }

    /// Drains every command queued from `from` to `me`. Called by `me`'s own
    /// `process_commands` loop after observing bit `from.0` set in its mask.
    pub fn drain(&self, me: ThreadSlot, from: ThreadSlot) -> Vec<Command> {
        let mut queues = self.queues.lock().unwrap();
        match queues.get_mut(&(from, me)) {
            Some(q) => q.drain(..).collect(),
            None => Vec::new(),
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self { queues: Mutex::new(HashMap::new()), signalers: Mutex::new(HashMap::new()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaler::SemSignaler;

    #[test]
    fn send_then_drain_in_fifo_order() {
        let dispatcher = Dispatcher::new();
        let a = ThreadSlot(0);
        let b = ThreadSlot(1);
        let sig_b = Arc::new(SemSignaler::new());
        dispatcher.register(b, sig_b.clone());

        dispatcher.send(a, b, Command { target: 1, kind: CommandKind::Revive });
        dispatcher.send(a, b, Command { target: 1, kind: CommandKind::ReaderInfo(4) });

        let mask = sig_b.poll();
        assert_eq!(mask, 1 << a.0);

        let drained = dispatcher.drain(b, a);
        assert_eq!(drained.len(), 2);
        assert!(matches!(drained[0].kind, CommandKind::Revive));
        assert!(matches!(drained[1].kind, CommandKind::ReaderInfo(4)));
    }

    #[test]
    fn drain_on_empty_queue_is_empty() {
        let dispatcher = Dispatcher::new();
        let drained = dispatcher.drain(ThreadSlot(2), ThreadSlot(3));
        assert!(drained.is_empty());
    }
}
