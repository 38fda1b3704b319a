//! Scenarios 2 and 3 (SPEC_FULL.md §8): `send_multi` plus cancellation,
//! with and without interleaved futile progress.

mod common;

use oomph_rs::Communicator;

fn round(comm: &Communicator, size: usize, tag_offset: i32) {
    let msg = comm.make_buffer::<i32>(size).unwrap();

    if comm.rank() == 0 {
        let mut msg = msg;
        for (i, slot) in msg.as_mut_slice().iter_mut().enumerate() {
            *slot = i as i32;
        }
        assert_eq!(comm.scheduled_sends(), 0);
        assert_eq!(comm.scheduled_recvs(), 0);

        comm.send_multi(msg, &[1, 2, 3], 84 + tag_offset).unwrap().wait();

        assert_eq!(comm.scheduled_sends(), 0);
        assert_eq!(comm.scheduled_recvs(), 0);
    } else {
        assert_eq!(comm.scheduled_sends(), 0);
        assert_eq!(comm.scheduled_recvs(), 0);

        let req = comm.recv(msg, 0, 42).unwrap();

        assert_eq!(comm.scheduled_sends(), 0);
        assert_eq!(comm.scheduled_recvs(), 1);

        // Rank 0 never sends with tag 42, so the cancel must win the race.
        assert!(req.cancel());

        assert_eq!(comm.scheduled_sends(), 0);
        assert_eq!(comm.scheduled_recvs(), 0);

        let msg = req.into_buffer().expect("cancelled recv still returns its buffer");
        let req = comm.recv(msg, 0, 84 + tag_offset).unwrap();
        req.wait();

        assert_eq!(comm.scheduled_sends(), 0);
        assert_eq!(comm.scheduled_recvs(), 0);

        let msg = req.into_buffer().unwrap();
        for (i, &v) in msg.iter().enumerate() {
            assert_eq!(v, i as i32);
        }
    }
}

fn round_with_futile_progress(comm: &Communicator, size: usize, tag_offset: i32) {
    let msg = comm.make_buffer::<i32>(size).unwrap();

    if comm.rank() == 0 {
        let mut msg = msg;
        for (i, slot) in msg.as_mut_slice().iter_mut().enumerate() {
            *slot = i as i32;
        }
        comm.send_multi(msg, &[1, 2, 3], 84 + tag_offset).unwrap().wait();
    } else {
        let req = comm.recv(msg, 0, 42).unwrap();
        for _ in 0..4 {
            comm.progress();
        }
        assert!(req.cancel());
        assert_eq!(comm.scheduled_recvs(), 0);

        let msg = req.into_buffer().unwrap();
        let req = comm.recv(msg, 0, 84 + tag_offset).unwrap();
        req.wait();
    }
}

#[test]
fn send_multi_then_cancel_unmatched_recv() {
    let ctx = common::context();
    let comm = ctx.get_communicator();
    if !common::has_ranks(&comm, 4) {
        return;
    }

    for (i, size) in [1usize, 32, 4096].into_iter().enumerate() {
        round(&comm, size, i as i32);
    }
}

#[test]
fn cancel_after_futile_progress() {
    let ctx = common::context();
    let comm = ctx.get_communicator();
    if !common::has_ranks(&comm, 4) {
        return;
    }

    for (i, size) in [1usize, 32, 4096].into_iter().enumerate() {
        round_with_futile_progress(&comm, size, 100 + i as i32);
    }
}
