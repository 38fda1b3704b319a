//! Memory region and handle (spec §4.1).
//!
//! A [`Region`] owns a byte buffer and attaches it to the context's dynamic
//! MPI window so remote ranks can reach it with one-sided operations. A
//! [`Handle`] is a non-owning view into an attached region, used to build
//! the wire-transferable remote descriptor in [`crate::buffer`].

use std::os::raw::c_void;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::sys::{self, MPI_Win};

/// A contiguous byte range registered with the transport so remote peers
/// may reach it via one-sided operations.
///
/// Exclusively owned by the [`crate::buffer::MessageBuffer`] that allocated
/// it through [`crate::communicator::Communicator::make_buffer`]. Non-copyable
/// and movable: ordinary Rust move semantics already give us "move nulls the
/// source" for free, since a moved-from value's `Drop` never runs.
pub struct Region {
    storage: Box<[u8]>,
    win: MPI_Win,
    attached: bool,
    /// Back-reference to the owning context's region table, so this
    /// region's destruction is reflected there without the `Context` having
    /// to track every `Region` individually (spec §5, "region table:
    /// inserted by `make_buffer`, erased on buffer destruction").
    table_count: Arc<AtomicUsize>,
}

impl Region {
    /// Allocate `size` bytes and attach them to `win`, recording the
    /// allocation in `table_count`.
    pub(crate) fn new(win: MPI_Win, size: usize, table_count: Arc<AtomicUsize>) -> Result<Self, Error> {
        let storage = vec![0u8; size].into_boxed_slice();
        let base = storage.as_ptr() as *mut c_void;

        // SAFETY: `base` points to `size` live bytes owned by `storage`,
        // which outlives the attachment (detached in `Drop` before
        // `storage` is freed).
        unsafe { sys::win_attach(win, base, size) }?;

        table_count.fetch_add(1, Ordering::SeqCst);
        log::trace!("region: attached {size} bytes at {base:p}");
        Ok(Self {
            storage,
            win,
            attached: true,
            table_count,
        })
    }

    /// Number of bytes in the region.
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    /// Whether the region is empty.
    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Raw base pointer of the region.
    pub(crate) fn base_ptr(&self) -> *mut u8 {
        self.storage.as_ptr() as *mut u8
    }

    pub(crate) fn as_slice(&self) -> &[u8] {
        &self.storage
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.storage
    }

    /// Get a handle to a sub-range of this region.
    ///
    /// Does not bounds-check `offset`/`size` against the region's declared
    /// length: this is a low-level primitive, callers are responsible (spec
    /// §4.1).
    pub fn get_handle(&self, offset: usize, size: usize) -> Handle {
        // SAFETY-relevant note: intentionally unchecked, see doc comment.
        Handle {
            base: unsafe { self.base_ptr().add(offset) },
            size,
        }
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        if !self.attached {
            return;
        }
        let base = self.base_ptr() as *mut c_void;
        // SAFETY: FFI; `base` was the exact pointer passed to `win_attach`.
        if let Err(e) = unsafe { sys::win_detach(self.win, base) } {
            // Destruction path: swallow the error rather than propagate it
            // (spec §7), but don't hide it from diagnostics.
            log::error!(
                "region: win_detach failed ({e}) for region at {base:p}; leaking attachment"
            );
        }
        self.attached = false;
        self.table_count.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A non-owning view into a sub-range of a [`Region`].
///
/// Plain value type: does not own memory, valid only while its region lives.
#[derive(Debug, Clone, Copy)]
pub struct Handle {
    base: *mut u8,
    size: usize,
}

impl Handle {
    /// Base pointer of the handle.
    pub fn as_ptr(&self) -> *mut u8 {
        self.base
    }

    /// Size in bytes covered by the handle.
    pub fn len(&self) -> usize {
        self.size
    }

    /// Whether the handle covers zero bytes.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
}

/// Wire-transferable description of a remote memory handle.
///
/// Unlike [`Handle`], this carries an absolute address suitable for sending
/// to a peer, mirroring the teacher's split between a local `Mr` and the
/// remote-facing `MrRemote` descriptor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RemoteHandle {
    /// Absolute virtual address on the owning rank, as required by MPI's
    /// dynamic-window one-sided addressing model.
    pub addr: u64,
    /// Length in bytes.
    pub len: usize,
}

impl From<Handle> for RemoteHandle {
    fn from(h: Handle) -> Self {
        Self {
            addr: h.base as u64,
            len: h.size,
        }
    }
}
