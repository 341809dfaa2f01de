use std::panic::Location;

use thiserror::Error;

/// Failure surfaced to the runtime's custom-call status channel.
///
/// Errors are `Clone` so that a latched autotune outcome can be handed back
/// verbatim to every later launch through the same call object.
#[derive(Debug, Clone, Error)]
pub enum LaunchError {
    /// Malformed opaque descriptor, or a caller-supplied value the launcher
    /// rejects (pointer alignment, shared memory beyond the device limit).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A GPU driver call reported non-success.
    #[error("{op} failed ({location}): {detail}")]
    Driver {
        op: &'static str,
        location: String,
        detail: String,
    },

    /// An invariant the launcher relies on was violated at runtime.
    #[error("internal error: {0}")]
    Internal(String),
}

pub type LaunchResult<T> = Result<T, LaunchError>;

impl LaunchError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        LaunchError::InvalidArgument(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        LaunchError::Internal(message.into())
    }

    #[track_caller]
    pub fn driver(op: &'static str, detail: impl Into<String>) -> Self {
        let location = Location::caller();
        LaunchError::Driver {
            op,
            location: format!("{}:{}", location.file(), location.line()),
            detail: detail.into(),
        }
    }
}
