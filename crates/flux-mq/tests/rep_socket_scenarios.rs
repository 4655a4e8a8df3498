//! End-to-end scenarios across the REP state machine, the pipe termination
//! handshake, and flow control — the seed scenarios the core is built to
//! satisfy. Styled after `flux-network`'s own thread-spawning integration
//! tests: a real cross-thread round trip for the first scenario, and
//! focused protocol-level checks (still through the public API, not
//! internals) for the rest.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use flux_mq::app_thread::AppThread;
use flux_mq::dispatcher::{Dispatcher, ThreadSlot};
use flux_mq::message::Msg;
use flux_mq::pipe::{self, ReadOutcome};

const HWM: u64 = 10;
const LWM: u64 = 10;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_env_filter(
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "flux_mq=debug".into()),
    ).with_test_writer().try_init();
}

#[test]
fn single_request_reply_round_trip_across_real_threads() {
    init_tracing();
    let dispatcher = Dispatcher::new();
    let client_slot = ThreadSlot(0);
    let server_slot = ThreadSlot(1);

    let (req_writer, rep_reader) =
        pipe::new_pipe(dispatcher.clone(), client_slot, 1, server_slot, 2, HWM, LWM);
    let (rep_writer, req_reader) =
        pipe::new_pipe(dispatcher.clone(), server_slot, 3, client_slot, 4, HWM, LWM);

    let server_dispatcher = dispatcher.clone();
    let server = thread::spawn(move || {
        let app = AppThread::new(server_dispatcher, server_slot);
        let rep = app.create_rep_socket();
        app.attach_pipe(&rep, rep_reader, rep_writer);

        let request = loop {
            match rep.borrow_mut().xrecv() {
                Ok(msg) => break msg,
                Err(_) => app.process_commands(true, false),
            }
        };
        assert_eq!(request.data(), b"ping");
        rep.borrow_mut().xsend(Msg::new(b"pong")).unwrap();
    });

    let client = thread::spawn(move || {
        let mut req_writer = req_writer;
        let mut req_reader = req_reader;
        req_writer.write(Msg::new(b"ping")).unwrap();
        req_writer.flush();

        loop {
            match req_reader.read() {
                ReadOutcome::Delivered(reply) => {
                    assert_eq!(reply.data(), b"pong");
                    break;
                }
                ReadOutcome::Empty => thread::sleep(Duration::from_micros(200)),
                ReadOutcome::Terminated => panic!("peer terminated before replying"),
            }
        }
    });

    server.join().unwrap();
    client.join().unwrap();
}

/// A bare request/reply peer driven directly, without its own `AppThread` —
/// enough to exercise the REP socket from the other side in a single
/// process.
struct Peer {
    to_rep: pipe::Writer,
    from_rep: pipe::Reader,
}

fn attach_peer(
    rep: &std::rc::Rc<std::cell::RefCell<flux_mq::RepSocket>>,
    dispatcher: &Arc<Dispatcher>,
    id_base: u64,
) -> Peer {
    let (req_writer, rep_reader) =
        pipe::new_pipe(dispatcher.clone(), ThreadSlot(0), id_base, ThreadSlot(1), id_base + 1, HWM, LWM);
    let (rep_writer, req_reader) = pipe::new_pipe(
        dispatcher.clone(),
        ThreadSlot(1),
        id_base + 2,
        ThreadSlot(0),
        id_base + 3,
        HWM,
        LWM,
    );
    rep.borrow_mut().xattach_pipes(rep_reader, rep_writer);
    Peer { to_rep: req_writer, from_rep: req_reader }
}

fn drain_reply(peer: &mut Peer) -> Msg {
    match peer.from_rep.read() {
        ReadOutcome::Delivered(msg) => msg,
        _ => panic!("expected a reply frame"),
    }
}

#[test]
fn multi_part_request_reassembles_in_order_and_reply_preserves_more() {
    let dispatcher = Dispatcher::new();
    let rep = std::rc::Rc::new(std::cell::RefCell::new(flux_mq::RepSocket::new()));
    let mut peer = attach_peer(&rep, &dispatcher, 1);

    let mut a = Msg::new(b"a");
    a.set_more(true);
    let mut b = Msg::new(b"b");
    b.set_more(true);
    let c = Msg::new(b"c");
    peer.to_rep.write(a).unwrap();
    peer.to_rep.write(b).unwrap();
    peer.to_rep.write(c).unwrap();
    peer.to_rep.flush();

    let mut rep = rep.borrow_mut();
    let frames: Vec<_> = (0..3).map(|_| rep.xrecv().unwrap()).collect();
    assert_eq!(frames[0].data(), b"a");
    assert!(frames[0].is_more());
    assert_eq!(frames[1].data(), b"b");
    assert!(frames[1].is_more());
    assert_eq!(frames[2].data(), b"c");
    assert!(!frames[2].is_more());

    let mut reply_a = Msg::new(b"x");
    reply_a.set_more(true);
    rep.xsend(reply_a).unwrap();
    assert!(rep.xhas_out());
    rep.xsend(Msg::new(b"y")).unwrap();
    assert!(!rep.xhas_out());
    drop(rep);

    assert_eq!(drain_reply(&mut peer).data(), b"x");
    assert_eq!(drain_reply(&mut peer).data(), b"y");
}

#[test]
fn round_robin_fairness_across_three_peers() {
    let dispatcher = Dispatcher::new();
    let rep = std::rc::Rc::new(std::cell::RefCell::new(flux_mq::RepSocket::new()));
    let mut peers =
        vec![attach_peer(&rep, &dispatcher, 1), attach_peer(&rep, &dispatcher, 10), attach_peer(&rep, &dispatcher, 20)];

    for (i, peer) in peers.iter_mut().enumerate() {
        peer.to_rep.write(Msg::new(&[i as u8])).unwrap();
        peer.to_rep.flush();
    }

    let mut order = Vec::new();
    for _ in 0..3 {
        let request = rep.borrow_mut().xrecv().unwrap();
        order.push(request.data()[0]);
        rep.borrow_mut().xsend(Msg::new(b"ack")).unwrap();
    }
    order.sort_unstable();
    assert_eq!(order, vec![0, 1, 2]);
}

#[test]
fn hwm_stalls_the_requester_and_resumes_on_credit_return() {
    let dispatcher = Dispatcher::new();
    let (mut req_writer, mut rep_reader) =
        pipe::new_pipe(dispatcher.clone(), ThreadSlot(0), 1, ThreadSlot(1), 2, 4, 2);

    for i in 0..4u8 {
        assert!(req_writer.write(Msg::new(&[i])).is_ok());
    }
    req_writer.flush();
    assert!(!req_writer.check_write(), "writer must stall once HWM is reached");

    for _ in 0..2 {
        assert!(matches!(rep_reader.read(), ReadOutcome::Delivered(_)));
    }
    let drained = dispatcher.drain(ThreadSlot(0), ThreadSlot(1));
    assert_eq!(drained.len(), 1, "credit return batches at LWM, not per message");

    assert!(req_writer.process_reader_info(2));
    assert!(req_writer.check_write(), "writer must resume once credit catches up to LWM");
    assert!(req_writer.write(Msg::new(b"more")).is_ok());
}

#[test]
fn reply_to_a_vanished_peer_is_dropped_without_surfacing_an_error() {
    let dispatcher = Dispatcher::new();
    let rep = std::rc::Rc::new(std::cell::RefCell::new(flux_mq::RepSocket::new()));
    let mut peer = attach_peer(&rep, &dispatcher, 1);

    peer.to_rep.write(Msg::new(b"ping")).unwrap();
    peer.to_rep.flush();
    rep.borrow_mut().xrecv().unwrap();

    // The requester's reader terminates its side of the reply pipe before
    // the reply goes out, as it would if the peer process vanished.
    peer.from_rep.term();
    let pipe_term = dispatcher.drain(ThreadSlot(1), ThreadSlot(0));
    assert_eq!(pipe_term.len(), 1);
    for cmd in pipe_term {
        flux_mq::app_thread::CommandSink::process_command(
            &mut *rep.borrow_mut(),
            cmd.target,
            cmd.kind,
        );
    }

    assert!(rep.borrow_mut().xsend(Msg::new(b"pong")).is_ok());
    assert!(!rep.borrow().xhas_out());
}

#[test]
fn termination_handshake_runs_delimiter_then_ack_then_pipe_is_gone() {
    let dispatcher = Dispatcher::new();
    let writer_slot = ThreadSlot(0);
    let reader_slot = ThreadSlot(1);
    let (mut writer, mut reader) = pipe::new_pipe(dispatcher.clone(), writer_slot, 1, reader_slot, 2, HWM, LWM);

    // Step 1: the writer side closes down, staging and flushing the
    // delimiter (spec: PipeTerm is implicit in seeing the delimiter).
    writer.term();
    writer.term(); // idempotent: a reordered or duplicated close is a no-op.

    // Step 2: the reader observes the delimiter and, in doing so, sends
    // PipeTerm to the writer.
    assert!(matches!(reader.read(), ReadOutcome::Terminated));
    let to_writer = dispatcher.drain(writer_slot, reader_slot);
    assert_eq!(to_writer.len(), 1);
    assert!(matches!(to_writer[0].kind, flux_mq::dispatcher::CommandKind::PipeTerm));

    // Step 3: the writer processes PipeTerm, which both signals the caller
    // to detach it and sends PipeTermAck back.
    assert!(writer.process_pipe_term());
    assert!(!writer.process_pipe_term(), "reprocessing the same PipeTerm must be a no-op");
    let to_reader = dispatcher.drain(reader_slot, writer_slot);
    assert_eq!(to_reader.len(), 1);
    assert!(matches!(to_reader[0].kind, flux_mq::dispatcher::CommandKind::PipeTermAck));

    // Step 4: the reader processes PipeTermAck; an in-flight `Revive` that
    // got reordered behind it must still be a safe no-op.
    reader.process_pipe_term_ack();
    assert!(reader.process_revive(), "revive after close is harmless, not an error");
}
