//! Error types.
//!
//! `Error` covers structural misuse and is returned synchronously to the
//! caller. Transport failures never surface here; they are recorded in the
//! job's result as `FetchError`.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("a job group needs at least one job")]
    EmptyGroup,
    #[error("job already belongs to a group")]
    JobOwned,
    #[error("job has already been started")]
    JobAlreadyStarted,
    #[error("group no longer accepts jobs")]
    GroupClosed,
    #[error("group has already been started")]
    GroupAlreadyStarted,
    #[error("dispatcher has been shut down")]
    DispatcherShutDown,
    #[error("form data needs key/value pairs, got {0} values")]
    OddFormValues(usize),
}

/// Failure reported by a fetch capability. One attempt per job; there is no
/// retry, callers resubmit a new job instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("HTTP {0}")]
    Http(u32),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("fetch panicked")]
    Panicked,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
