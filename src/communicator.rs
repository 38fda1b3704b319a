//! The public submission surface (spec §4.5).
//!
//! A cheap, `Clone`-able handle over a shared [`Context`]; many can exist
//! per context, typically one per thread that wants to communicate (spec
//! §4.7, §5).

use std::mem::size_of;
use std::os::raw::{c_int, c_void};
use std::sync::{Arc, Mutex};

use crate::buffer::MessageBuffer;
use crate::context::Context;
use crate::error::Error;
use crate::pending::{Counters, MultiSend, PendingOp, PendingRecv, PendingRecvRef, PendingSend, PendingSendRef};
use crate::progress;
use crate::region::RemoteHandle;
use crate::request::{Progressor, RecvRequest, Request, Slot};
use crate::sys;

struct CommInner {
    context: Context,
    counters: Arc<Counters>,
}

/// The public surface: buffer allocation, submission of sends/receives,
/// progress, and the scheduled-operation counters.
#[derive(Clone)]
pub struct Communicator {
    inner: Arc<CommInner>,
}

fn validate_rank(rank: c_int, size: c_int) -> Result<(), Error> {
    if rank < 0 || rank >= size {
        return Err(Error::InvalidArgument(format!(
            "rank {rank} out of range [0, {size})"
        )));
    }
    Ok(())
}

impl Communicator {
    pub(crate) fn new(context: Context) -> Self {
        Self {
            inner: Arc::new(CommInner {
                context,
                counters: Arc::new(Counters::default()),
            }),
        }
    }

    /// This rank's identity within the group.
    pub fn rank(&self) -> i32 {
        self.inner.context.rank()
    }

    /// The group's size.
    pub fn size(&self) -> i32 {
        self.inner.context.size()
    }

    /// Allocate an `n`-element buffer registered with the transport.
    /// Zero-initialization is not guaranteed.
    pub fn make_buffer<T: Copy>(&self, n: usize) -> Result<MessageBuffer<T>, Error> {
        let region = self.inner.context.new_region(n * size_of::<T>())?;
        Ok(MessageBuffer::new(region, n))
    }

    /// Number of sends submitted on this communicator that have not yet
    /// reached a terminal state.
    pub fn scheduled_sends(&self) -> usize {
        self.inner.counters.sends()
    }

    /// Number of receives submitted on this communicator that have not yet
    /// reached a terminal state.
    pub fn scheduled_recvs(&self) -> usize {
        self.inner.counters.recvs()
    }

    /// Drive the progress engine once. Returns the number of completions
    /// dispatched (spec §4.6).
    pub fn progress(&self) -> usize {
        progress::drain_and_dispatch(self.inner.context.request_table())
    }

    fn progressor(&self) -> Arc<dyn Progressor> {
        Arc::new(self.clone())
    }

    /// Submit a send with no completion callback.
    pub fn send<T: Copy + Send + 'static>(
        &self,
        msg: MessageBuffer<T>,
        dst: i32,
        tag: i32,
    ) -> Result<Request<T>, Error> {
        self.send_impl(msg, dst, tag, None)
    }

    /// Submit a send, invoking `callback(msg, dst, tag)` on completion.
    pub fn send_with<T, F>(
        &self,
        msg: MessageBuffer<T>,
        dst: i32,
        tag: i32,
        callback: F,
    ) -> Result<Request<T>, Error>
    where
        T: Copy + Send + 'static,
        F: FnOnce(MessageBuffer<T>, i32, i32) + Send + 'static,
    {
        self.send_impl(msg, dst, tag, Some(Box::new(callback)))
    }

    fn send_impl<T: Copy + Send + 'static>(
        &self,
        msg: MessageBuffer<T>,
        dst: i32,
        tag: i32,
        callback: Option<Box<dyn FnOnce(MessageBuffer<T>, i32, i32) + Send>>,
    ) -> Result<Request<T>, Error> {
        validate_rank(dst, self.size())?;

        let bytes = msg.as_bytes();
        let ptr = bytes.as_ptr() as *mut c_void;
        let len = bytes.len() as c_int;

        // SAFETY: FFI; `ptr` is valid for `len` bytes for as long as `msg`
        // (moved into the pending entry below) is alive, which outlives the
        // send.
        let mpi_request = unsafe { sys::isend(ptr, len, dst, tag, self.inner.context.comm()) }?;

        self.inner.counters.sends.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let slot = Arc::new(Mutex::new(Slot::default()));
        let callback = callback
            .map(|cb| Box::new(move |b: Option<MessageBuffer<T>>| cb(b.expect("owned send always returns its buffer"), dst, tag)) as Box<dyn FnOnce(Option<MessageBuffer<T>>) + Send>);
        let pending = PendingSend {
            mpi_request,
            counters: self.inner.counters.clone(),
            multi: None,
            slot: Some(slot.clone()),
            buffer: Some(msg),
            callback,
        };
        self.inner.context.insert_pending(Box::new(pending));
        log::trace!("send: posted to dst={dst} tag={tag} len={len}");
        Ok(Request::new(slot, self.progressor()))
    }

    /// Submit a send to every destination in `dsts`, no completion callback.
    pub fn send_multi<T: Copy + Send + 'static>(
        &self,
        msg: MessageBuffer<T>,
        dsts: &[i32],
        tag: i32,
    ) -> Result<Request<T>, Error> {
        self.send_multi_impl(msg, dsts, tag, None)
    }

    /// As [`Communicator::send_multi`], invoking `callback(msg, dsts, tag)`
    /// exactly once after every destination send has reached a terminal
    /// state.
    pub fn send_multi_with<T, F>(
        &self,
        msg: MessageBuffer<T>,
        dsts: &[i32],
        tag: i32,
        callback: F,
    ) -> Result<Request<T>, Error>
    where
        T: Copy + Send + 'static,
        F: FnOnce(MessageBuffer<T>, Vec<i32>, i32) + Send + 'static,
    {
        let dsts_owned = dsts.to_vec();
        self.send_multi_impl(
            msg,
            dsts,
            tag,
            Some(Box::new(move |b: Option<MessageBuffer<T>>| {
                callback(
                    b.expect("send_multi always returns its buffer"),
                    dsts_owned,
                    tag,
                )
            })),
        )
    }

    fn send_multi_impl<T: Copy + Send + 'static>(
        &self,
        msg: MessageBuffer<T>,
        dsts: &[i32],
        tag: i32,
        callback: Option<Box<dyn FnOnce(Option<MessageBuffer<T>>) + Send>>,
    ) -> Result<Request<T>, Error> {
        if dsts.is_empty() {
            return Err(Error::InvalidArgument("send_multi needs at least one destination".into()));
        }
        for &dst in dsts {
            validate_rank(dst, self.size())?;
        }

        let bytes = msg.as_bytes();
        let ptr = bytes.as_ptr() as *mut c_void;
        let len = bytes.len() as c_int;

        let slot = Arc::new(Mutex::new(Slot::default()));
        let multi = Arc::new(MultiSend {
            remaining: std::sync::atomic::AtomicUsize::new(dsts.len()),
            first_error: Mutex::new(None),
            slot: slot.clone(),
            // The buffer is shared read-only across every fan-out leg; no
            // single leg owns it, so it's parked here until the last leg
            // resolves and hands it to the callback (spec §4.5, §9).
            buffer: Mutex::new(Some(msg)),
            callback: Mutex::new(callback),
            counters: self.inner.counters.clone(),
        });

        self.inner.counters.sends.fetch_add(1, std::sync::atomic::Ordering::SeqCst);

        for &dst in dsts {
            // SAFETY: FFI; `ptr` stays valid because `multi.buffer` keeps
            // the `MessageBuffer` (and its backing `Region`) alive until
            // every leg below has been posted and later completed.
            let posted = unsafe { sys::isend(ptr, len, dst, tag, self.inner.context.comm()) };
            // A leg that fails to post is still tracked as terminal so the
            // aggregate's `remaining` count stays correct.
            let (mpi_request, error) = match posted {
                Ok(req) => (req, None),
                Err(e) => (sys::MPI_REQUEST_NULL, Some(e)),
            };
            let pending: PendingSend<T> = PendingSend {
                mpi_request,
                counters: self.inner.counters.clone(),
                multi: Some(multi.clone()),
                slot: None,
                buffer: None,
                callback: None,
            };
            if let Some(error) = error {
                Box::new(pending).complete(Some(error));
            } else {
                self.inner.context.insert_pending(Box::new(pending));
            }
        }

        log::trace!("send_multi: posted to {} dests tag={tag} len={len}", dsts.len());
        Ok(Request::new(slot, self.progressor()))
    }

    /// Submit a receive with no completion callback.
    pub fn recv<T: Copy + Send + 'static>(
        &self,
        msg: MessageBuffer<T>,
        src: i32,
        tag: i32,
    ) -> Result<RecvRequest<T>, Error> {
        self.recv_impl(msg, src, tag, None)
    }

    /// Submit a receive, invoking `callback(msg, src, tag)` on completion.
    /// The callback never fires if the receive is successfully cancelled.
    pub fn recv_with<T, F>(
        &self,
        msg: MessageBuffer<T>,
        src: i32,
        tag: i32,
        callback: F,
    ) -> Result<RecvRequest<T>, Error>
    where
        T: Copy + Send + 'static,
        F: FnOnce(MessageBuffer<T>, i32, i32) + Send + 'static,
    {
        self.recv_impl(msg, src, tag, Some(Box::new(callback)))
    }

    fn recv_impl<T: Copy + Send + 'static>(
        &self,
        mut msg: MessageBuffer<T>,
        src: i32,
        tag: i32,
        callback: Option<Box<dyn FnOnce(MessageBuffer<T>, i32, i32) + Send>>,
    ) -> Result<RecvRequest<T>, Error> {
        if src != sys::MPI_ANY_SOURCE {
            validate_rank(src, self.size())?;
        }

        let bytes = msg.as_mut_bytes();
        let ptr = bytes.as_mut_ptr() as *mut c_void;
        let len = bytes.len() as c_int;

        // SAFETY: FFI; `ptr` stays valid because `msg` is moved into the
        // pending entry right below, which outlives the receive.
        let mpi_request = unsafe { sys::irecv(ptr, len, src, tag, self.inner.context.comm()) }?;

        self.inner.counters.recvs.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let slot = Arc::new(Mutex::new(Slot::default()));
        let callback = callback.map(|cb| {
            Box::new(move |b: Option<MessageBuffer<T>>, src: i32, tag: i32| {
                cb(b.expect("owned recv always returns its buffer"), src, tag)
            }) as Box<dyn FnOnce(Option<MessageBuffer<T>>, i32, i32) + Send>
        });
        let pending = PendingRecv {
            mpi_request,
            counters: self.inner.counters.clone(),
            slot: slot.clone(),
            buffer: Some(msg),
            src,
            tag,
            callback,
        };
        let id = self.inner.context.insert_pending(Box::new(pending));
        log::trace!("recv: posted from src={src} tag={tag} len={len}");
        Ok(RecvRequest::new(Request::new(slot, self.progressor()), id))
    }

    /// Submit a send that borrows `msg` instead of taking ownership of it
    /// (spec §4.3, §9 "`Submission::Borrowed` vs. `Submission::Owned`").
    ///
    /// # Safety
    /// `msg` must stay allocated and untouched until the returned request
    /// resolves, i.e. until `is_ready()`/`test()`/`wait()` report completion.
    /// The submission reads `msg`'s bytes directly over the wire; moving or
    /// dropping it before then is undefined behavior.
    pub unsafe fn send_ref<T: Copy + Send + 'static>(
        &self,
        msg: &MessageBuffer<T>,
        dst: i32,
        tag: i32,
    ) -> Result<Request<T>, Error> {
        self.send_ref_impl(msg, dst, tag, None)
    }

    /// As [`Communicator::send_ref`], invoking `callback()` once the send
    /// completes. Since the caller retains `msg`, the callback receives
    /// nothing; it exists purely to drive resubmission without polling
    /// `test()` by hand.
    ///
    /// # Safety
    /// Same contract as [`Communicator::send_ref`], extended through the
    /// point `callback` runs.
    pub unsafe fn send_ref_with<T, F>(
        &self,
        msg: &MessageBuffer<T>,
        dst: i32,
        tag: i32,
        callback: F,
    ) -> Result<Request<T>, Error>
    where
        T: Copy + Send + 'static,
        F: FnOnce() + Send + 'static,
    {
        self.send_ref_impl(msg, dst, tag, Some(Box::new(callback)))
    }

    unsafe fn send_ref_impl<T: Copy + Send + 'static>(
        &self,
        msg: &MessageBuffer<T>,
        dst: i32,
        tag: i32,
        callback: Option<Box<dyn FnOnce() + Send>>,
    ) -> Result<Request<T>, Error> {
        validate_rank(dst, self.size())?;

        let bytes = msg.as_bytes();
        let ptr = bytes.as_ptr() as *mut c_void;
        let len = bytes.len() as c_int;

        // SAFETY: caller-upheld per this function's safety contract.
        let mpi_request = sys::isend(ptr, len, dst, tag, self.inner.context.comm())?;

        self.inner.counters.sends.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let slot = Arc::new(Mutex::new(Slot::default()));
        let pending = PendingSendRef {
            mpi_request,
            counters: self.inner.counters.clone(),
            slot: slot.clone(),
            callback,
        };
        self.inner.context.insert_pending(Box::new(pending));
        log::trace!("send_ref: posted to dst={dst} tag={tag} len={len}");
        Ok(Request::new(slot, self.progressor()))
    }

    /// Submit a receive that borrows `msg` instead of taking ownership of
    /// it. See [`Communicator::send_ref`] for the mirrored send-side
    /// contract.
    ///
    /// # Safety
    /// `msg` must stay allocated and untouched by anything else until the
    /// returned request resolves.
    pub unsafe fn recv_ref<T: Copy + Send + 'static>(
        &self,
        msg: &mut MessageBuffer<T>,
        src: i32,
        tag: i32,
    ) -> Result<RecvRequest<T>, Error> {
        self.recv_ref_impl(msg, src, tag, None)
    }

    /// As [`Communicator::recv_ref`], invoking `callback(src, tag)` once the
    /// receive completes (never on a successful cancellation).
    ///
    /// # Safety
    /// Same contract as [`Communicator::recv_ref`], extended through the
    /// point `callback` runs.
    pub unsafe fn recv_ref_with<T, F>(
        &self,
        msg: &mut MessageBuffer<T>,
        src: i32,
        tag: i32,
        callback: F,
    ) -> Result<RecvRequest<T>, Error>
    where
        T: Copy + Send + 'static,
        F: FnOnce(i32, i32) + Send + 'static,
    {
        self.recv_ref_impl(msg, src, tag, Some(Box::new(callback)))
    }

    unsafe fn recv_ref_impl<T: Copy + Send + 'static>(
        &self,
        msg: &mut MessageBuffer<T>,
        src: i32,
        tag: i32,
        callback: Option<Box<dyn FnOnce(i32, i32) + Send>>,
    ) -> Result<RecvRequest<T>, Error> {
        if src != sys::MPI_ANY_SOURCE {
            validate_rank(src, self.size())?;
        }

        let bytes = msg.as_mut_bytes();
        let ptr = bytes.as_mut_ptr() as *mut c_void;
        let len = bytes.len() as c_int;

        // SAFETY: caller-upheld per this function's safety contract.
        let mpi_request = sys::irecv(ptr, len, src, tag, self.inner.context.comm())?;

        self.inner.counters.recvs.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let slot = Arc::new(Mutex::new(Slot::default()));
        let pending = PendingRecvRef {
            mpi_request,
            counters: self.inner.counters.clone(),
            slot: slot.clone(),
            src,
            tag,
            callback,
        };
        let id = self.inner.context.insert_pending(Box::new(pending));
        log::trace!("recv_ref: posted from src={src} tag={tag} len={len}");
        Ok(RecvRequest::new(Request::new(slot, self.progressor()), id))
    }

    /// One-sided write of `local`'s contents into the region described by
    /// `remote` on `dst`, acquiring (and caching) a shared passive lock on
    /// `dst` through this context's [`crate::lock_cache::LockCache`] first
    /// (spec §4.2, PURPOSE & SCOPE: "must manage cached remote-window locks
    /// to avoid lock storms"). Blocks until the write is locally complete.
    ///
    /// # Safety
    /// `remote` must describe a region currently attached to the transport
    /// window on rank `dst`, of at least `local`'s byte length, and not
    /// concurrently written by another one-sided or two-sided operation.
    pub unsafe fn put<T: Copy>(
        &self,
        local: &MessageBuffer<T>,
        dst: i32,
        remote: RemoteHandle,
    ) -> Result<(), Error> {
        validate_rank(dst, self.size())?;
        self.inner.context.lock_cache().lock(dst)?;
        let bytes = local.as_bytes();
        let win = self.inner.context.win();
        sys::put(bytes.as_ptr() as *const c_void, bytes.len(), dst, remote.addr, win)?;
        sys::win_flush(win, dst)?;
        log::trace!("put: wrote {} bytes to rank {dst}", bytes.len());
        Ok(())
    }

    /// One-sided read of the region described by `remote` on `src` into
    /// `local`, under the same lock-cache-managed passive lock as
    /// [`Communicator::put`]. Blocks until the read is locally complete.
    ///
    /// # Safety
    /// `remote` must describe a region currently attached to the transport
    /// window on rank `src`, of at least `local`'s byte length, and not
    /// concurrently written while the read is outstanding.
    pub unsafe fn get<T: Copy>(
        &self,
        local: &mut MessageBuffer<T>,
        src: i32,
        remote: RemoteHandle,
    ) -> Result<(), Error> {
        validate_rank(src, self.size())?;
        self.inner.context.lock_cache().lock(src)?;
        let win = self.inner.context.win();
        let bytes = local.as_mut_bytes();
        sys::get(bytes.as_mut_ptr() as *mut c_void, bytes.len(), src, remote.addr, win)?;
        sys::win_flush(win, src)?;
        log::trace!("get: read {} bytes from rank {src}", bytes.len());
        Ok(())
    }

    /// Attempt to cancel the receive identified by `id`. See
    /// [`RecvRequest::cancel`] for the semantics.
    pub(crate) fn try_cancel(&self, id: u64) -> bool {
        let Some(mut entry) = self.inner.context.take_pending(id) else {
            // Already drained by a concurrent `progress()`: it must have
            // completed normally, so cancellation did not "win".
            return false;
        };

        let req = entry.raw_request();
        // SAFETY: FFI; `req` is a live request solely owned by `entry`.
        if let Err(e) = unsafe { sys::cancel(req) } {
            log::warn!("cancel: MPI_Cancel failed: {e}");
            entry.complete(Some(e));
            return false;
        }

        // SAFETY: FFI; per the MPI standard, a cancelled request must still
        // be completed with `MPI_Wait`/`MPI_Test` to free it.
        let status = match unsafe { sys::wait(req) } {
            Ok(status) => status,
            Err(e) => {
                entry.complete(Some(e));
                return false;
            }
        };

        // SAFETY: FFI; `status` was just filled in by `sys::wait` above.
        let cancelled = match unsafe { sys::test_cancelled(&status) } {
            Ok(cancelled) => cancelled,
            Err(e) => {
                entry.complete(Some(e));
                return false;
            }
        };

        if cancelled {
            log::trace!("cancel: recv id={id} cancelled");
            entry.mark_cancelled();
            true
        } else {
            // The message had already matched; deliver the completion
            // normally, as `progress()` would have (spec §4.6).
            log::trace!("cancel: recv id={id} had already matched, completing normally");
            entry.complete(None);
            false
        }
    }
}

impl Progressor for Communicator {
    fn progress(&self) -> usize {
        Communicator::progress(self)
    }

    fn try_cancel(&self, id: u64) -> bool {
        Communicator::try_cancel(self, id)
    }
}
