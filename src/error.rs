//! Error taxonomy surfaced by the runtime (spec §4.8).

use std::os::raw::c_int;

use thiserror::Error;

/// Uniform failure kind for everything that can go wrong at submission time
/// or be observed on a completed request.
///
/// `cancel()`'s `false` return is deliberately not a variant here: a failed
/// cancellation is not an error, it is the normal "the message had already
/// matched" outcome (spec §4.4, §4.8).
#[derive(Debug, Error)]
pub enum Error {
    /// The underlying transport (MPI) returned a non-success code.
    #[error("MPI call {what} failed with code {code}: {message}")]
    Transport {
        /// Raw MPI error code.
        code: c_int,
        /// Name of the MPI call that failed, for diagnostics.
        what: &'static str,
        /// Human-readable description resolved via `MPI_Error_string`.
        message: String,
    },

    /// A rank, destination list, or buffer size argument was invalid.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A [`crate::buffer::MessageBuffer`] was accessed after its ownership
    /// had been transferred into a submission.
    #[error("buffer accessed after it was moved into a submission")]
    UseAfterMove,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_formats_code_and_message() {
        let err = Error::Transport {
            code: 17,
            what: "MPI_Isend",
            message: "invalid rank".into(),
        };
        assert_eq!(
            err.to_string(),
            "MPI call MPI_Isend failed with code 17: invalid rank"
        );
    }

    #[test]
    fn invalid_argument_formats_its_message() {
        let err = Error::InvalidArgument("rank 9 out of range [0, 4)".into());
        assert_eq!(
            err.to_string(),
            "invalid argument: rank 9 out of range [0, 4)"
        );
    }

    #[test]
    fn use_after_move_has_a_fixed_message() {
        let err = Error::UseAfterMove;
        assert_eq!(
            err.to_string(),
            "buffer accessed after it was moved into a submission"
        );
    }
}
