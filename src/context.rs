//! Process-wide coordinator (spec §4.7).

use std::collections::HashMap;
use std::os::raw::c_int;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::Config;
use crate::error::Error;
use crate::lock_cache::LockCache;
use crate::pending::PendingOp;
use crate::region::Region;
use crate::sys::{self, MPI_Comm, MPI_Win};

pub(crate) type RequestTable = Mutex<HashMap<u64, Box<dyn PendingOp>>>;

struct ContextInner {
    comm: MPI_Comm,
    win: MPI_Win,
    rank: c_int,
    size: c_int,
    threaded: bool,
    config: Config,
    lock_cache: LockCache,
    request_table: RequestTable,
    next_id: AtomicU64,
    region_count: Arc<AtomicUsize>,
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        // SAFETY: destruction path; `self.win`/`self.comm` were created by
        // this same `ContextInner` in `Context::with_config` and are not
        // used again after this point.
        unsafe {
            sys::win_free(&mut self.win);
            sys::comm_free(&mut self.comm);
        }
    }
}

/// Owner of the transport communicator handle, the region registry, and the
/// lock cache. A `Context` duplicates the MPI communicator it is given so
/// that two `Context`s built on the same underlying communicator never share
/// tag/request namespace (spec §4.7, "a second context ... must be
/// isolated").
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    /// Build a context from an existing MPI communicator.
    ///
    /// `threaded` should be `true` if multiple threads will each obtain a
    /// [`crate::communicator::Communicator`] from this context and submit or
    /// progress concurrently.
    ///
    /// Fails with [`Error::Transport`] if MPI has not been initialized yet,
    /// or if duplicating the communicator or creating the dynamic window
    /// fails.
    pub fn new(comm: MPI_Comm, threaded: bool) -> Result<Self, Error> {
        Self::with_config(comm, threaded, Config::from_env())
    }

    /// As [`Context::new`], with an explicit [`Config`] instead of one
    /// sourced from the environment.
    pub fn with_config(comm: MPI_Comm, threaded: bool, config: Config) -> Result<Self, Error> {
        if !sys::is_initialized() {
            return Err(Error::Transport {
                code: -1,
                what: "MPI_Initialized",
                message: "MPI_Init/MPI_Init_thread must be called before Context::new".into(),
            });
        }

        // SAFETY: FFI; `comm` is the caller-supplied, already-initialized
        // communicator.
        let mut dup = unsafe { sys::comm_dup(comm) }?;

        // SAFETY: FFI on a valid, just-duplicated communicator.
        let rank = unsafe { sys::comm_rank(dup) }?;
        // SAFETY: FFI on a valid, just-duplicated communicator.
        let size = unsafe { sys::comm_size(dup) }?;

        // SAFETY: FFI; `dup` is valid.
        let win = match unsafe { sys::win_create_dynamic(dup) } {
            Ok(win) => win,
            Err(e) => {
                // SAFETY: best-effort cleanup of the communicator we just made.
                unsafe { sys::comm_free(&mut dup) };
                return Err(e);
            }
        };

        let lock_cache = LockCache::new(win, config.lock_cache_capacity());

        log::debug!("context: created, rank {rank}/{size}, threaded={threaded}");
        Ok(Self {
            inner: Arc::new(ContextInner {
                comm: dup,
                win,
                rank,
                size,
                threaded,
                config,
                lock_cache,
                request_table: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
                region_count: Arc::new(AtomicUsize::new(0)),
            }),
        })
    }

    /// Create a new [`crate::communicator::Communicator`] handle over this
    /// context. Cheap; many may exist per context, one per thread that
    /// wants to communicate (spec §4.7, §5).
    pub fn get_communicator(&self) -> crate::communicator::Communicator {
        crate::communicator::Communicator::new(self.clone())
    }

    /// Whether this context was constructed in multi-threaded mode.
    pub fn is_threaded(&self) -> bool {
        self.inner.threaded
    }

    /// Number of regions currently registered (attached) through this
    /// context's buffers. Exposed for diagnostics and tests.
    pub fn region_count(&self) -> usize {
        self.inner.region_count.load(Ordering::SeqCst)
    }

    pub(crate) fn rank(&self) -> c_int {
        self.inner.rank
    }

    pub(crate) fn size(&self) -> c_int {
        self.inner.size
    }

    pub(crate) fn comm(&self) -> MPI_Comm {
        self.inner.comm
    }

    pub(crate) fn win(&self) -> MPI_Win {
        self.inner.win
    }

    pub(crate) fn lock_cache(&self) -> &LockCache {
        &self.inner.lock_cache
    }

    pub(crate) fn request_table(&self) -> &RequestTable {
        &self.inner.request_table
    }

    pub(crate) fn new_region(&self, size: usize) -> Result<Region, Error> {
        Region::new(self.inner.win, size, self.inner.region_count.clone())
    }

    /// Insert a newly submitted operation, returning the id used to find it
    /// again later (e.g. for cancellation).
    pub(crate) fn insert_pending(&self, op: Box<dyn PendingOp>) -> u64 {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        self.inner.request_table.lock().unwrap().insert(id, op);
        id
    }

    /// Remove and return a still-pending operation by id, if it hasn't
    /// already been drained by `progress()`.
    pub(crate) fn take_pending(&self, id: u64) -> Option<Box<dyn PendingOp>> {
        self.inner.request_table.lock().unwrap().remove(&id)
    }
}
