//! Per-window passive-lock cache (spec §4.2).
//!
//! Re-expresses `original_source/src/mpi/lock_cache.hpp`: remembers which
//! ranks already hold a shared passive lock on this window so repeated
//! one-sided accesses to the same rank don't pay per-access lock/unlock
//! overhead, and guarantees every acquired lock is released exactly once.

use std::collections::HashSet;
use std::os::raw::c_int;
use std::sync::Mutex;

use crate::error::Error;
use crate::sys::{self, MPI_Win};

pub(crate) type RankType = c_int;

/// Abstraction over "lock/unlock a rank on some window", so the bookkeeping
/// in [`LockCache`] can be exercised in unit tests without a live MPI
/// transport (spec §8 scenario 8); the production implementation is
/// [`MpiWinLocker`].
trait WinLocker {
    fn lock_rank(&self, rank: RankType) -> Result<(), Error>;
    fn unlock_rank(&self, rank: RankType);
}

struct MpiWinLocker {
    win: MPI_Win,
}

impl WinLocker for MpiWinLocker {
    fn lock_rank(&self, rank: RankType) -> Result<(), Error> {
        // SAFETY: FFI; `self.win` is valid for the lifetime of the cache
        // that owns this locker.
        unsafe { sys::win_lock_shared(self.win, rank) }
    }

    fn unlock_rank(&self, rank: RankType) {
        // SAFETY: FFI; destruction path, errors are swallowed per spec §7.
        if let Err(e) = unsafe { sys::win_unlock(self.win, rank) } {
            log::error!("lock_cache: unlock failed for rank {rank}: {e}");
        } else {
            log::trace!("lock_cache: unlocked rank {rank}");
        }
    }
}

/// The per-window set of remote ranks currently holding a shared passive
/// lock, guarded by a mutex so it is safe to share across communicator
/// handles in multi-threaded mode.
pub struct LockCache {
    locker: Box<dyn WinLocker + Send + Sync>,
    ranks: Mutex<HashSet<RankType>>,
}

impl LockCache {
    /// Create a cache over `win`, preallocating room for `capacity` ranks.
    pub(crate) fn new(win: MPI_Win, capacity: usize) -> Self {
        Self::with_locker(Box::new(MpiWinLocker { win }), capacity)
    }

    fn with_locker(locker: Box<dyn WinLocker + Send + Sync>, capacity: usize) -> Self {
        Self {
            locker,
            ranks: Mutex::new(HashSet::with_capacity(capacity)),
        }
    }

    /// Acquire a shared passive lock on `rank` if we don't already hold one.
    ///
    /// No-op if `rank` is already locked. Thread-safe: concurrent calls for
    /// distinct ranks only contend on the internal set, not on MPI itself.
    pub fn lock(&self, rank: RankType) -> Result<(), Error> {
        let mut ranks = self.ranks.lock().unwrap();
        if ranks.contains(&rank) {
            return Ok(());
        }
        self.locker.lock_rank(rank)?;
        ranks.insert(rank);
        log::trace!("lock_cache: locked rank {rank}");
        Ok(())
    }

    /// Number of ranks currently locked.
    pub fn locked_count(&self) -> usize {
        self.ranks.lock().unwrap().len()
    }
}

impl Drop for LockCache {
    fn drop(&mut self) {
        let ranks = self.ranks.get_mut().unwrap();
        for &rank in ranks.iter() {
            self.locker.unlock_rank(rank);
        }
        ranks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeLocker {
        lock_calls: AtomicUsize,
        unlock_calls: AtomicUsize,
    }

    impl WinLocker for std::sync::Arc<FakeLocker> {
        fn lock_rank(&self, _rank: RankType) -> Result<(), Error> {
            self.lock_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn unlock_rank(&self, _rank: RankType) {
            self.unlock_calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn repeated_lock_is_idempotent_per_rank() {
        let fake = std::sync::Arc::new(FakeLocker::default());
        let cache = LockCache::with_locker(Box::new(fake.clone()), 4);

        cache.lock(3).unwrap();
        cache.lock(3).unwrap();
        cache.lock(3).unwrap();
        cache.lock(7).unwrap();

        assert_eq!(fake.lock_calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.locked_count(), 2);
    }

    #[test]
    fn drop_unlocks_every_locked_rank_exactly_once() {
        let fake = std::sync::Arc::new(FakeLocker::default());
        {
            let cache = LockCache::with_locker(Box::new(fake.clone()), 4);
            cache.lock(1).unwrap();
            cache.lock(2).unwrap();
            cache.lock(1).unwrap();
        }
        assert_eq!(fake.unlock_calls.load(Ordering::SeqCst), 2);
    }
}
