//! Type-erased bookkeeping for submissions in flight (backs spec §4.6).
//!
//! [`crate::context::Context`] keeps one request table shared by every
//! communicator it has issued. Every submission is boxed behind
//! [`PendingOp`] so the table can hold them all in one map, whatever its
//! element type `T` and whether it is a plain send/recv, a `send_multi`
//! fan-out leg, or a borrowed-mode send/recv. This mirrors how a single
//! completion queue polls work completions of differing shapes in the
//! teacher (`rdma/cq/mod.rs::poll_some`).

use std::os::raw::c_int;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::buffer::MessageBuffer;
use crate::error::Error;
use crate::request::Slot;
use crate::sys::MPI_Request;

/// Shared counters a `Communicator` exposes as `scheduled_sends`/
/// `scheduled_recvs` (spec §4.5). Kept behind `Arc` so a pending entry can
/// decrement the counter that issued it even though the table itself is
/// owned by the `Context`, not any one `Communicator`.
#[derive(Default)]
pub(crate) struct Counters {
    pub(crate) sends: AtomicUsize,
    pub(crate) recvs: AtomicUsize,
}

impl Counters {
    pub(crate) fn sends(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }

    pub(crate) fn recvs(&self) -> usize {
        self.recvs.load(Ordering::SeqCst)
    }
}

/// One submission waiting on completion, type-erased over its element type.
pub(crate) trait PendingOp: Send {
    /// The raw MPI request(s) this entry is waiting on. A plain send/recv
    /// has one; a `send_multi` fans out into one `PendingOp` per
    /// destination, each with its own single request.
    fn raw_request(&mut self) -> &mut MPI_Request;

    /// Invoked once `MPI_Test`/`MPI_Wait` report this request as complete.
    /// Consumes the entry: fires the callback (if any), resolves the public
    /// `Request`/`RecvRequest` slot, decrements the scheduled counter.
    fn complete(self: Box<Self>, error: Option<Error>);

    /// Invoked instead of `complete` when a receive was successfully
    /// cancelled: the callback must never fire.
    fn mark_cancelled(self: Box<Self>) {
        unreachable!("mark_cancelled called on a non-cancellable (send) pending op")
    }
}

/// A plain send, or one fanned-out leg of a `send_multi`.
pub(crate) struct PendingSend<T: Copy> {
    pub(crate) mpi_request: MPI_Request,
    pub(crate) counters: Arc<Counters>,
    /// Shared across every leg of a `send_multi`; `None` for a plain send.
    pub(crate) multi: Option<Arc<MultiSend<T>>>,
    /// Only set for a plain (non-multi) send; `send_multi` legs keep the
    /// shared buffer in `multi.buffer` instead, since no single leg owns it.
    pub(crate) slot: Option<Arc<Mutex<Slot<T>>>>,
    pub(crate) buffer: Option<MessageBuffer<T>>,
    pub(crate) callback: Option<Box<dyn FnOnce(Option<MessageBuffer<T>>) + Send>>,
}

/// Aggregates the legs of a single `send_multi` submission so its callback
/// fires exactly once, after every destination has reached a terminal
/// state (spec §4.5, §9: fan-out, first-error-wins).
pub(crate) struct MultiSend<T: Copy> {
    pub(crate) remaining: AtomicUsize,
    pub(crate) first_error: Mutex<Option<Error>>,
    pub(crate) slot: Arc<Mutex<Slot<T>>>,
    pub(crate) buffer: Mutex<Option<MessageBuffer<T>>>,
    pub(crate) callback: Mutex<Option<Box<dyn FnOnce(Option<MessageBuffer<T>>) + Send>>>,
    pub(crate) counters: Arc<Counters>,
}

impl<T: Copy + Send + 'static> PendingOp for PendingSend<T> {
    fn raw_request(&mut self) -> &mut MPI_Request {
        &mut self.mpi_request
    }

    fn complete(self: Box<Self>, error: Option<Error>) {
        match self.multi {
            None => {
                self.counters.sends.fetch_sub(1, Ordering::SeqCst);
                let slot_handle = self.slot.expect("plain send always has a slot");
                let mut slot = slot_handle.lock().unwrap();
                slot.ready = true;
                slot.error = error;
                if let Some(cb) = self.callback {
                    drop(slot);
                    cb(self.buffer);
                } else if let Some(buf) = self.buffer {
                    slot.returned = Some(buf);
                }
            }
            Some(multi) => {
                if let Some(e) = error {
                    let mut first = multi.first_error.lock().unwrap();
                    if first.is_none() {
                        *first = Some(e);
                    }
                }
                if multi.remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
                    // Last leg: resolve the aggregate.
                    multi.counters.sends.fetch_sub(1, Ordering::SeqCst);
                    let mut slot = multi.slot.lock().unwrap();
                    slot.ready = true;
                    slot.error = multi.first_error.lock().unwrap().take();
                    let cb = multi.callback.lock().unwrap().take();
                    let buffer = multi.buffer.lock().unwrap().take();
                    if let Some(cb) = cb {
                        drop(slot);
                        cb(buffer);
                    } else {
                        slot.returned = buffer;
                    }
                }
            }
        }
    }
}

/// A plain receive.
pub(crate) struct PendingRecv<T: Copy> {
    pub(crate) mpi_request: MPI_Request,
    pub(crate) counters: Arc<Counters>,
    pub(crate) slot: Arc<Mutex<Slot<T>>>,
    pub(crate) buffer: Option<MessageBuffer<T>>,
    pub(crate) src: c_int,
    pub(crate) tag: c_int,
    pub(crate) callback: Option<Box<dyn FnOnce(Option<MessageBuffer<T>>, c_int, c_int) + Send>>,
}

impl<T: Copy + Send + 'static> PendingOp for PendingRecv<T> {
    fn raw_request(&mut self) -> &mut MPI_Request {
        &mut self.mpi_request
    }

    fn complete(self: Box<Self>, error: Option<Error>) {
        self.counters.recvs.fetch_sub(1, Ordering::SeqCst);
        let mut slot = self.slot.lock().unwrap();
        slot.ready = true;
        slot.error = error;
        drop(slot);
        if let Some(cb) = self.callback {
            cb(self.buffer, self.src, self.tag);
        } else if let Some(buf) = self.buffer {
            self.slot.lock().unwrap().returned = Some(buf);
        }
    }

    fn mark_cancelled(self: Box<Self>) {
        self.counters.recvs.fetch_sub(1, Ordering::SeqCst);
        let mut slot = self.slot.lock().unwrap();
        slot.ready = true;
        slot.cancelled = true;
        drop(slot);
        // Callback must never fire on a successful cancel; the buffer goes
        // straight back to the caller via `into_buffer`.
        if let Some(buf) = self.buffer {
            self.slot.lock().unwrap().returned = Some(buf);
        }
    }
}

/// A borrowed-mode send: the caller keeps ownership of the
/// [`MessageBuffer`](crate::buffer::MessageBuffer), so unlike [`PendingSend`]
/// this entry never stores one, only the completion signal and an optional
/// callback (spec §4.3, §9 "`Submission::Borrowed` vs. `Submission::Owned`").
pub(crate) struct PendingSendRef<T: Copy> {
    pub(crate) mpi_request: MPI_Request,
    pub(crate) counters: Arc<Counters>,
    pub(crate) slot: Arc<Mutex<Slot<T>>>,
    pub(crate) callback: Option<Box<dyn FnOnce() + Send>>,
}

impl<T: Copy + Send + 'static> PendingOp for PendingSendRef<T> {
    fn raw_request(&mut self) -> &mut MPI_Request {
        &mut self.mpi_request
    }

    fn complete(self: Box<Self>, error: Option<Error>) {
        self.counters.sends.fetch_sub(1, Ordering::SeqCst);
        let mut slot = self.slot.lock().unwrap();
        slot.ready = true;
        slot.error = error;
        drop(slot);
        if let Some(cb) = self.callback {
            cb();
        }
    }
}

/// A borrowed-mode receive; see [`PendingSendRef`].
pub(crate) struct PendingRecvRef<T: Copy> {
    pub(crate) mpi_request: MPI_Request,
    pub(crate) counters: Arc<Counters>,
    pub(crate) slot: Arc<Mutex<Slot<T>>>,
    pub(crate) src: c_int,
    pub(crate) tag: c_int,
    pub(crate) callback: Option<Box<dyn FnOnce(c_int, c_int) + Send>>,
}

impl<T: Copy + Send + 'static> PendingOp for PendingRecvRef<T> {
    fn raw_request(&mut self) -> &mut MPI_Request {
        &mut self.mpi_request
    }

    fn complete(self: Box<Self>, error: Option<Error>) {
        self.counters.recvs.fetch_sub(1, Ordering::SeqCst);
        let mut slot = self.slot.lock().unwrap();
        slot.ready = true;
        slot.error = error;
        drop(slot);
        if let Some(cb) = self.callback {
            cb(self.src, self.tag);
        }
    }

    fn mark_cancelled(self: Box<Self>) {
        self.counters.recvs.fetch_sub(1, Ordering::SeqCst);
        let mut slot = self.slot.lock().unwrap();
        slot.ready = true;
        slot.cancelled = true;
    }
}
