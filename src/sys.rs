//! Raw MPI bindings and safe-ish wrappers around them.
//!
//! Every raw `mpi_sys::*` call in this crate lives in this module; other
//! modules call the wrappers here instead (e.g. [`crate::region`],
//! [`crate::lock_cache`], [`crate::context`], [`crate::communicator`] and
//! [`crate::progress`] all go through `sys::isend`/`sys::win_lock_shared`/
//! etc. rather than `mpi_sys` directly). Each wrapper still returns the raw
//! FFI failure mode as an `Err`; the safety contract is "the handles passed
//! in are valid for the call," documented per function.

use std::ffi::CStr;
use std::os::raw::{c_int, c_void};

pub use mpi_sys::{
    MPI_Aint, MPI_Comm, MPI_Datatype, MPI_Info, MPI_Request, MPI_Status, MPI_Win, MPI_ANY_SOURCE,
    MPI_ANY_TAG, MPI_BYTE, MPI_COMM_NULL, MPI_ERROR_STRING, MPI_INFO_NULL, MPI_LOCK_SHARED,
    MPI_REQUEST_NULL, MPI_STATUS_IGNORE, MPI_SUCCESS, MPI_UNDEFINED, MPI_WIN_NULL,
};

use crate::error::Error;

/// Convert an `int` MPI return code into a `Result`, fetching the MPI error
/// string for anything other than `MPI_SUCCESS`.
///
/// # Safety
///
/// `code` must be a value actually returned by an MPI call; this function
/// calls back into the MPI library to resolve the error string.
pub(crate) unsafe fn check(code: c_int, what: &'static str) -> Result<(), Error> {
    if code == MPI_SUCCESS as c_int {
        return Ok(());
    }
    Err(Error::Transport {
        code,
        what,
        message: error_string(code),
    })
}

/// Best-effort, never-panicking resolution of an MPI error code to text.
///
/// Used on destructor paths where we must not propagate a `Result` and on
/// the main error path to enrich the error message.
pub(crate) unsafe fn error_string(code: c_int) -> String {
    let mut buf = [0 as std::os::raw::c_char; MPI_ERROR_STRING as usize];
    let mut len: c_int = 0;
    let rc = mpi_sys::MPI_Error_string(code, buf.as_mut_ptr(), &mut len);
    if rc != MPI_SUCCESS as c_int || len < 0 {
        return format!("MPI error {code} (message unavailable)");
    }
    CStr::from_ptr(buf.as_ptr())
        .to_string_lossy()
        .into_owned()
}

/// True if the process has already called `MPI_Init`/`MPI_Init_thread`.
///
/// Initialization itself is the caller's responsibility (spec §6); this is
/// only used by [`crate::context::Context::new`] to fail fast with a clear
/// error instead of segfaulting inside the MPI library.
pub(crate) fn is_initialized() -> bool {
    let mut flag: c_int = 0;
    // SAFETY: `MPI_Initialized` never fails and writes exactly one `c_int`.
    unsafe { mpi_sys::MPI_Initialized(&mut flag) };
    flag != 0
}

/// Duplicate `comm`, giving the caller an isolated tag/request namespace.
///
/// # Safety
/// `comm` must be a valid, already-initialized communicator.
pub(crate) unsafe fn comm_dup(comm: MPI_Comm) -> Result<MPI_Comm, Error> {
    let mut dup: MPI_Comm = comm;
    let rc = mpi_sys::MPI_Comm_dup(comm, &mut dup);
    check(rc, "MPI_Comm_dup")?;
    Ok(dup)
}

/// # Safety
/// `comm` must be valid.
pub(crate) unsafe fn comm_rank(comm: MPI_Comm) -> Result<c_int, Error> {
    let mut rank: c_int = 0;
    check(mpi_sys::MPI_Comm_rank(comm, &mut rank), "MPI_Comm_rank")?;
    Ok(rank)
}

/// # Safety
/// `comm` must be valid.
pub(crate) unsafe fn comm_size(comm: MPI_Comm) -> Result<c_int, Error> {
    let mut size: c_int = 0;
    check(mpi_sys::MPI_Comm_size(comm, &mut size), "MPI_Comm_size")?;
    Ok(size)
}

/// Best-effort: logs and swallows a failure rather than returning it, for
/// use on destructor paths (spec §7).
///
/// # Safety
/// `comm` must be a communicator this process obtained from `comm_dup`.
pub(crate) unsafe fn comm_free(comm: &mut MPI_Comm) {
    let rc = mpi_sys::MPI_Comm_free(comm);
    if rc != MPI_SUCCESS as c_int {
        log::error!("sys: MPI_Comm_free failed with code {rc}");
    }
}

/// # Safety
/// `comm` must be valid.
pub(crate) unsafe fn win_create_dynamic(comm: MPI_Comm) -> Result<MPI_Win, Error> {
    let mut win: MPI_Win = MPI_WIN_NULL;
    let rc = mpi_sys::MPI_Win_create_dynamic(MPI_INFO_NULL, comm, &mut win);
    check(rc, "MPI_Win_create_dynamic")?;
    Ok(win)
}

/// Best-effort: logs and swallows a failure rather than returning it, for
/// use on destructor paths (spec §7).
///
/// # Safety
/// `win` must be a window this process created.
pub(crate) unsafe fn win_free(win: &mut MPI_Win) {
    let rc = mpi_sys::MPI_Win_free(win);
    if rc != MPI_SUCCESS as c_int {
        log::error!("sys: MPI_Win_free failed with code {rc}");
    }
}

/// # Safety
/// `base` must point to `size` live, writable bytes that outlive the
/// attachment (detached via [`win_detach`] before they are freed).
pub(crate) unsafe fn win_attach(win: MPI_Win, base: *mut c_void, size: usize) -> Result<(), Error> {
    check(mpi_sys::MPI_Win_attach(win, base, size), "MPI_Win_attach")
}

/// # Safety
/// `base` must be the exact pointer previously passed to [`win_attach`].
pub(crate) unsafe fn win_detach(win: MPI_Win, base: *mut c_void) -> Result<(), Error> {
    check(mpi_sys::MPI_Win_detach(win, base), "MPI_Win_detach")
}

/// Acquire a shared passive lock on `rank`.
///
/// # Safety
/// `win` must be a live window.
pub(crate) unsafe fn win_lock_shared(win: MPI_Win, rank: c_int) -> Result<(), Error> {
    check(
        mpi_sys::MPI_Win_lock(MPI_LOCK_SHARED as c_int, rank, 0, win),
        "MPI_Win_lock",
    )
}

/// # Safety
/// `win` must be a live window with a passive lock held on `rank`.
pub(crate) unsafe fn win_unlock(win: MPI_Win, rank: c_int) -> Result<(), Error> {
    check(mpi_sys::MPI_Win_unlock(rank, win), "MPI_Win_unlock")
}

/// Block until every one-sided operation issued to `rank` on `win` has
/// completed locally, without releasing the passive lock (so a
/// [`crate::lock_cache::LockCache`]-held lock can be reused by the next
/// `put`/`get` to the same rank).
///
/// # Safety
/// `win` must be a live window with a passive lock held on `rank`.
pub(crate) unsafe fn win_flush(win: MPI_Win, rank: c_int) -> Result<(), Error> {
    check(mpi_sys::MPI_Win_flush(rank, win), "MPI_Win_flush")
}

/// Post a one-sided write of `len` bytes from `origin` to `target_disp` (an
/// absolute address, per the dynamic-window addressing model) on `target_rank`.
///
/// # Safety
/// `origin` must be valid for `len` bytes for the duration of the call;
/// `target_disp` must be a byte range currently attached to `win` on
/// `target_rank`.
pub(crate) unsafe fn put(
    origin: *const c_void,
    len: usize,
    target_rank: c_int,
    target_disp: u64,
    win: MPI_Win,
) -> Result<(), Error> {
    let count = len as c_int;
    check(
        mpi_sys::MPI_Put(
            origin as *mut c_void,
            count,
            MPI_BYTE,
            target_rank,
            target_disp as MPI_Aint,
            count,
            MPI_BYTE,
            win,
        ),
        "MPI_Put",
    )
}

/// As [`put`], but reads `len` bytes from `target_disp` on `target_rank`
/// into `origin`.
///
/// # Safety
/// `origin` must be valid and writable for `len` bytes for the duration of
/// the call; `target_disp` must be a byte range currently attached to `win`
/// on `target_rank`.
pub(crate) unsafe fn get(
    origin: *mut c_void,
    len: usize,
    target_rank: c_int,
    target_disp: u64,
    win: MPI_Win,
) -> Result<(), Error> {
    let count = len as c_int;
    check(
        mpi_sys::MPI_Get(
            origin,
            count,
            MPI_BYTE,
            target_rank,
            target_disp as MPI_Aint,
            count,
            MPI_BYTE,
            win,
        ),
        "MPI_Get",
    )
}

/// Post a nonblocking send of `len` bytes from `buf`.
///
/// # Safety
/// `buf` must be valid for `len` bytes until the returned request completes.
pub(crate) unsafe fn isend(
    buf: *mut c_void,
    len: c_int,
    dst: c_int,
    tag: c_int,
    comm: MPI_Comm,
) -> Result<MPI_Request, Error> {
    let mut request = MPI_REQUEST_NULL;
    check(
        mpi_sys::MPI_Isend(buf, len, MPI_BYTE, dst, tag, comm, &mut request),
        "MPI_Isend",
    )?;
    Ok(request)
}

/// Post a nonblocking receive of up to `len` bytes into `buf`.
///
/// # Safety
/// `buf` must be valid and writable for `len` bytes until the returned
/// request completes.
pub(crate) unsafe fn irecv(
    buf: *mut c_void,
    len: c_int,
    src: c_int,
    tag: c_int,
    comm: MPI_Comm,
) -> Result<MPI_Request, Error> {
    let mut request = MPI_REQUEST_NULL;
    check(
        mpi_sys::MPI_Irecv(buf, len, MPI_BYTE, src, tag, comm, &mut request),
        "MPI_Irecv",
    )?;
    Ok(request)
}

/// Non-blocking completion check. Returns whether `request` is done; on
/// success `request` is set to `MPI_REQUEST_NULL` by the underlying call, per
/// the MPI standard.
///
/// # Safety
/// `request` must be a live request solely owned by the caller.
pub(crate) unsafe fn test(request: &mut MPI_Request) -> Result<bool, Error> {
    let mut flag: c_int = 0;
    let mut status = std::mem::zeroed::<MPI_Status>();
    check(mpi_sys::MPI_Test(request, &mut flag, &mut status), "MPI_Test")?;
    Ok(flag != 0)
}

/// # Safety
/// `request` must be a live request solely owned by the caller.
pub(crate) unsafe fn wait(request: &mut MPI_Request) -> Result<MPI_Status, Error> {
    let mut status = std::mem::zeroed::<MPI_Status>();
    check(mpi_sys::MPI_Wait(request, &mut status), "MPI_Wait")?;
    Ok(status)
}

/// # Safety
/// `request` must be a live request solely owned by the caller.
pub(crate) unsafe fn cancel(request: &mut MPI_Request) -> Result<(), Error> {
    check(mpi_sys::MPI_Cancel(request), "MPI_Cancel")
}

/// # Safety
/// `status` must have been filled in by a prior `MPI_Wait`/`MPI_Test` on a
/// cancelled request.
pub(crate) unsafe fn test_cancelled(status: &MPI_Status) -> Result<bool, Error> {
    let mut cancelled: c_int = 0;
    check(
        mpi_sys::MPI_Test_cancelled(status, &mut cancelled),
        "MPI_Test_cancelled",
    )?;
    Ok(cancelled != 0)
}
