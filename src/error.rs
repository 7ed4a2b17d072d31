//! Error taxonomy shared by jobs, callbacks, and synchronous accessors.

use thiserror::Error;

use crate::job::JobId;

/// The crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy surfaced on job results and callbacks.
///
/// Argument-level errors (`InvalidArgument`) are returned synchronously from
/// the call that produced them. Everything else flows through a [`crate::job::Job`]'s
/// result slot and is also emitted as a notification.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not ready: {0}")]
    NotReady(String),

    #[error("transport failure: {0}")]
    TransportFailure(String),

    #[error("timeout waiting on node {0:?}")]
    Timeout(Option<String>),

    #[error("pipeline stopped by task at node {0}")]
    StoppedByTask(String),

    #[error("interrupted")]
    Interrupted,

    #[error("unknown job id {0}")]
    UnknownJob(JobId),

    #[error("internal contract violation: {0}")]
    Internal(String),

    #[error("invalid pipeline bundle: {0}")]
    InvalidBundle(String),

    #[error("(de)serialize error: {0}")]
    Serde(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serde(e.to_string())
    }
}
