//! Scenario 6 (SPEC_FULL.md §8): two back-to-back sends on the same tag
//! must be received in submission order.

mod common;

#[test]
fn two_messages_same_tag_arrive_in_order() {
    let ctx = common::context();
    let comm = ctx.get_communicator();
    let size = comm.size();
    if !common::has_ranks(&comm, 2) {
        return;
    }

    let tag = 3;

    if comm.rank() == 0 {
        let mut m1 = comm.make_buffer::<i32>(8).unwrap();
        let mut m2 = comm.make_buffer::<i32>(8).unwrap();
        m1.as_mut_slice().fill(1);
        m2.as_mut_slice().fill(2);

        let dsts: Vec<i32> = (1..size).collect();
        // Two back-to-back fan-out sends on the same tag; waiting on the
        // first before posting the second keeps their relative order at
        // every destination (spec §4.6, per-(peer, tag) FIFO).
        comm.send_multi(m1, &dsts, tag).unwrap().wait();
        comm.send_multi(m2, &dsts, tag).unwrap().wait();
    } else {
        let r1 = comm.make_buffer::<i32>(8).unwrap();
        let r2 = comm.make_buffer::<i32>(8).unwrap();

        let req1 = comm.recv(r1, 0, tag).unwrap();
        let req2 = comm.recv(r2, 0, tag).unwrap();
        req1.wait();
        req2.wait();

        let r1 = req1.into_buffer().unwrap();
        let r2 = req2.into_buffer().unwrap();
        assert!(r1.iter().all(|&v| v == 1));
        assert!(r2.iter().all(|&v| v == 2));
    }

    assert_eq!(comm.scheduled_sends(), 0);
    assert_eq!(comm.scheduled_recvs(), 0);
}
