//! Scenario 5 (SPEC_FULL.md §8): ownership-transfer resubmission. Each
//! completion callback receives the buffer by value and moves it back into
//! the next round's submission. See `borrowed_resubmit.rs` for scenario 4,
//! the `send_ref`/`recv_ref` counterpart that never moves the buffer at all.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use oomph_rs::MessageBuffer;

const ROUNDS: usize = 50;

#[test]
fn fifty_round_exchange_via_ownership_transfer_resubmission() {
    let ctx = common::context();
    let comm = ctx.get_communicator();
    if !common::has_ranks(&comm, 2) {
        return;
    }
    if comm.rank() > 1 {
        return;
    }

    let peer = 1 - comm.rank();
    let tag = 7;

    let sent = Arc::new(AtomicUsize::new(0));
    let received = Arc::new(AtomicUsize::new(0));

    let mut send_buf = comm.make_buffer::<i32>(16).unwrap();
    send_buf.as_mut_slice().fill(comm.rank() * 1000);
    let recv_buf = comm.make_buffer::<i32>(16).unwrap();

    fn resubmit_send(
        comm: &oomph_rs::Communicator,
        msg: MessageBuffer<i32>,
        peer: i32,
        tag: i32,
        sent: Arc<AtomicUsize>,
    ) {
        let round = sent.fetch_add(1, Ordering::SeqCst) + 1;
        if round >= ROUNDS {
            return;
        }
        let comm = comm.clone();
        comm.send_with(msg, peer, tag, move |msg, peer, tag| {
            resubmit_send(&comm, msg, peer, tag, sent.clone());
        })
        .unwrap();
    }

    fn resubmit_recv(
        comm: &oomph_rs::Communicator,
        msg: MessageBuffer<i32>,
        peer: i32,
        tag: i32,
        received: Arc<AtomicUsize>,
    ) {
        let round = received.fetch_add(1, Ordering::SeqCst) + 1;
        if round >= ROUNDS {
            return;
        }
        let comm = comm.clone();
        comm.recv_with(msg, peer, tag, move |msg, peer, tag| {
            resubmit_recv(&comm, msg, peer, tag, received.clone());
        })
        .unwrap();
    }

    let first_send = comm
        .send_with(send_buf, peer, tag, {
            let comm = comm.clone();
            let sent = sent.clone();
            move |msg, peer, tag| resubmit_send(&comm, msg, peer, tag, sent)
        })
        .unwrap();
    let first_recv = comm
        .recv_with(recv_buf, peer, tag, {
            let comm = comm.clone();
            let received = received.clone();
            move |msg, peer, tag| resubmit_recv(&comm, msg, peer, tag, received)
        })
        .unwrap();

    while sent.load(Ordering::SeqCst) < ROUNDS || received.load(Ordering::SeqCst) < ROUNDS {
        comm.progress();
    }
    first_send.wait();
    first_recv.wait();

    assert_eq!(sent.load(Ordering::SeqCst), ROUNDS);
    assert_eq!(received.load(Ordering::SeqCst), ROUNDS);
    assert_eq!(comm.scheduled_sends(), 0);
    assert_eq!(comm.scheduled_recvs(), 0);
}
