//! Request and Recv-Request handles (spec §4.4).

use std::sync::{Arc, Mutex};

use crate::buffer::MessageBuffer;
use crate::error::Error;

/// The seam [`Request`]/[`RecvRequest`] progress and cancel through, so their
/// state-machine transitions can be unit-tested against a fake transport
/// instead of a live [`crate::communicator::Communicator`], the same role
/// [`crate::lock_cache::LockCache`]'s `WinLocker` trait plays for lock/unlock
/// (spec §4.11).
pub(crate) trait Progressor: Send + Sync {
    /// Drive the communicator's progress engine once.
    fn progress(&self) -> usize;
    /// Attempt to cancel the receive identified by `id`.
    fn try_cancel(&self, id: u64) -> bool;
}

/// Terminal outcome recorded once a submission resolves.
pub(crate) struct Slot<T> {
    pub(crate) ready: bool,
    pub(crate) cancelled: bool,
    pub(crate) error: Option<Error>,
    /// The buffer, if ownership was transferred into the submission and no
    /// callback consumed it (so the user retrieves it via
    /// [`Request::into_buffer`]).
    pub(crate) returned: Option<MessageBuffer<T>>,
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self {
            ready: false,
            cancelled: false,
            error: None,
            returned: None,
        }
    }
}

/// A handle to an in-flight point-to-point operation.
///
/// Single-shot: once ready, repeated `wait()`/`test()` calls are no-ops.
/// Sends cannot be cancelled; only [`RecvRequest`] exposes `cancel()`.
pub struct Request<T: Copy> {
    pub(crate) slot: Arc<Mutex<Slot<T>>>,
    pub(crate) comm: Arc<dyn Progressor>,
}

impl<T: Copy> Request<T> {
    pub(crate) fn new(slot: Arc<Mutex<Slot<T>>>, comm: Arc<dyn Progressor>) -> Self {
        Self { slot, comm }
    }

    /// Readiness without progressing the communicator.
    pub fn is_ready(&self) -> bool {
        self.slot.lock().unwrap().ready
    }

    /// Progress the communicator once, then report readiness.
    pub fn test(&self) -> bool {
        if self.is_ready() {
            return true;
        }
        self.comm.progress();
        self.is_ready()
    }

    /// Spin `progress()` until the request is ready.
    pub fn wait(&self) {
        while !self.test() {}
    }

    /// The transport-level error, if the operation failed.
    ///
    /// Only meaningful once `is_ready()` is true.
    pub fn error(&self) -> Option<String> {
        self.slot
            .lock()
            .unwrap()
            .error
            .as_ref()
            .map(ToString::to_string)
    }

    /// Wait for completion and take back the buffer, if no callback already
    /// consumed it.
    ///
    /// Returns `None` if the submission used a callback (which already
    /// received the buffer) or was a borrowed submission (`send_ref`/
    /// `recv_ref`), which never hands its buffer through the request at all
    /// since the caller kept it the whole time.
    pub fn into_buffer(self) -> Option<MessageBuffer<T>> {
        self.wait();
        self.slot.lock().unwrap().returned.take()
    }
}

/// A handle to an in-flight receive, additionally supporting cancellation.
pub struct RecvRequest<T: Copy> {
    pub(crate) request: Request<T>,
    pub(crate) id: u64,
}

impl<T: Copy> RecvRequest<T> {
    pub(crate) fn new(request: Request<T>, id: u64) -> Self {
        Self { request, id }
    }

    /// Readiness without progressing the communicator.
    pub fn is_ready(&self) -> bool {
        self.request.is_ready()
    }

    /// Progress the communicator once, then report readiness.
    pub fn test(&self) -> bool {
        self.request.test()
    }

    /// Spin `progress()` until the request is ready.
    pub fn wait(&self) {
        self.request.wait()
    }

    /// Wait for completion and take back a transferred buffer, if any.
    pub fn into_buffer(self) -> Option<MessageBuffer<T>> {
        self.request.into_buffer()
    }

    /// Attempt to cancel this receive.
    ///
    /// Returns `true` if the transport confirms the receive had not yet
    /// matched a message: the callback, if any, is never invoked, and the
    /// scheduled-recv counter is decremented immediately. Returns `false` if
    /// a message had already matched; the request then completes normally
    /// (spec §4.4, §4.6).
    pub fn cancel(&self) -> bool {
        if self.is_ready() {
            return false;
        }
        self.request.comm.try_cancel(self.id)
    }
}
