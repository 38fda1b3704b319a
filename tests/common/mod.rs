//! Shared setup for the integration suite: one-time `MPI_Init_thread` and a
//! rank-count skip helper, mirroring the original project's
//! `mpi_test_fixture` (`original_source/test/mpi_runner/mpi_test_fixture.hpp`),
//! reworked for `cargo test`'s per-binary-not-per-suite process model.

use std::os::raw::c_int;
use std::sync::Once;

use oomph_rs::{Communicator, Context};

static INIT: Once = Once::new();

/// The world communicator, initializing MPI on first use. Safe to call from
/// every test in this binary: `Once` guarantees `MPI_Init_thread` runs
/// exactly once per process, as the standard requires.
pub fn world_comm() -> mpi_sys::MPI_Comm {
    INIT.call_once(|| {
        let mut provided: c_int = 0;
        // SAFETY: called at most once per process, before any other MPI
        // call, with null argc/argv as the standard permits.
        let rc = unsafe {
            mpi_sys::MPI_Init_thread(
                std::ptr::null_mut(),
                std::ptr::null_mut(),
                mpi_sys::RSMPI_THREAD_MULTIPLE,
                &mut provided,
            )
        };
        assert_eq!(rc, mpi_sys::MPI_SUCCESS as c_int, "MPI_Init_thread failed");
    });
    // SAFETY: `MPI_Init_thread` above has already run by the time any
    // caller reaches this point.
    unsafe { mpi_sys::RSMPI_COMM_WORLD() }
}

/// Build a fresh, single-threaded [`Context`] over the world communicator.
pub fn context() -> Context {
    Context::new(world_comm(), false).expect("Context::new over MPI_COMM_WORLD")
}

/// `true` if `comm` has at least `n` ranks; otherwise prints a skip message
/// to stderr and returns `false`. These scenarios are meant to run under
/// `mpirun -n <ranks> cargo test`; a plain `cargo test` invocation only has
/// one rank and cannot exercise them.
pub fn has_ranks(comm: &Communicator, n: i32) -> bool {
    if comm.size() < n {
        eprintln!(
            "skipping: needs {} ranks, got {} (run under `mpirun -n {} cargo test`)",
            n,
            comm.size(),
            n
        );
        return false;
    }
    true
}
