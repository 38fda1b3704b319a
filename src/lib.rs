//! Asynchronous point-to-point message passing over MPI, with cooperative
//! progress and cancellable receives.
//!
//! [`Context`] owns the transport communicator and dynamic window; a
//! [`Communicator`] is a cheap handle obtained from it for submitting sends
//! and receives. Submissions return a [`Request`] (or [`RecvRequest`], for
//! receives, which additionally supports [`RecvRequest::cancel`]); none of
//! them complete on their own; the caller must call `test()`/`wait()` on the
//! request or [`Communicator::progress`] directly to drive completion.
//!
//! # Example
//!
//! ```ignore
//! use oomph_rs::Context;
//!
//! // `MPI_Init`/`MPI_Init_thread` must already have been called; obtaining
//! // the raw `MPI_Comm` to wrap is the caller's responsibility (spec §6).
//! let ctx = Context::new(world_comm, false)?;
//! let comm = ctx.get_communicator();
//!
//! let mut buf = comm.make_buffer::<u8>(64)?;
//! buf.as_mut_slice().fill(7);
//!
//! let dst = (comm.rank() + 1) % comm.size();
//! let req = comm.send(buf, dst, 0)?;
//! req.wait();
//! ```

mod buffer;
mod communicator;
mod config;
mod context;
mod error;
mod lock_cache;
mod pending;
mod progress;
mod region;
mod request;
mod sys;

pub use buffer::MessageBuffer;
pub use communicator::Communicator;
pub use config::{Config, ConfigBuilder};
pub use context::Context;
pub use error::{Error, Result};
pub use lock_cache::LockCache;
pub use region::{Handle, RemoteHandle};
pub use request::{RecvRequest, Request};
