//! A pipe: a lock-free queue of message descriptors plus its `reader` and
//! `writer` endpoints (spec §3 "Pipe", §4.1, §4.2, §4.3).

mod queue;
mod reader;
mod writer;

pub use reader::{Reader, ReadOutcome};
pub use writer::Writer;

use std::sync::Arc;

use crate::dispatcher::{Dispatcher, PipeId, ThreadSlot};
use queue::Queue;

/// Creates one uni-directional pipe: a `Writer` bound to `(writer_slot,
/// writer_id)` and a `Reader` bound to `(reader_slot, reader_id)`, sharing
/// one underlying queue. The pipe is co-owned by its two endpoints — it is
/// dropped once both `Arc<Queue>` handles are gone, which in practice means
/// once the reader processes `pipe_term_ack` and is itself discarded by its
/// socket (spec §3 "The pipe is co-owned by its two endpoints").
#[must_use]
pub fn new_pipe(
    dispatcher: Arc<Dispatcher>,
    writer_slot: ThreadSlot,
    writer_id: PipeId,
    reader_slot: ThreadSlot,
    reader_id: PipeId,
    hwm: u64,
    lwm: u64,
) -> (Writer, Reader) {
    let queue = Arc::new(Queue::new());
    let writer = Writer::new(
        writer_id,
        writer_slot,
        reader_id,
        reader_slot,
        hwm,
        lwm,
        queue.clone(),
        dispatcher.clone(),
    );
    let reader = Reader::new(reader_id, reader_slot, writer_id, writer_slot, hwm, lwm, queue, dispatcher);
    (writer, reader)
}
