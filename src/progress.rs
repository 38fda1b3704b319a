//! The progress engine (spec §4.6).
//!
//! Drains every submission that has reached a terminal state since the last
//! call, then dispatches their callbacks. The draining pass holds the
//! table's lock; dispatch happens after the lock is released so a callback
//! that resubmits work on the same communicator never deadlocks against its
//! own `progress()` call (spec §9, "dispatch loop: drain pending
//! completions into a local list, release the lock, invoke callbacks").

use crate::context::RequestTable;
use crate::sys;

/// Poll every pending submission in `table` once, dispatch the callbacks of
/// those that completed, and return how many were dispatched.
pub(crate) fn drain_and_dispatch(table: &RequestTable) -> usize {
    let mut completed = Vec::new();
    {
        let mut table = table.lock().unwrap();
        let ids: Vec<u64> = table.keys().copied().collect();
        for id in ids {
            let entry = table
                .get_mut(&id)
                .expect("id was just read from this same table");
            // SAFETY: FFI; `entry.raw_request()` is a live `MPI_Request`
            // owned solely by this table entry.
            let result = unsafe { sys::test(entry.raw_request()) };
            let done = !matches!(result, Ok(false));
            if done {
                let entry = table.remove(&id).expect("checked present above");
                completed.push((entry, result.err()));
            }
        }
    }

    let dispatched = completed.len();
    for (entry, error) in completed {
        entry.complete(error);
    }
    dispatched
}
