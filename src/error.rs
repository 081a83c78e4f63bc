pub use anyhow::Result as AnyResult;

use thiserror::Error as ErrorTrait;

/// The sum type of all errors that might result from cache and REST
/// operations.
#[derive(ErrorTrait, Debug)]
pub enum Error {
    /// Caller-supplied parameters are contradictory or out of range.
    /// Raised synchronously, before any I/O; never partially applies
    /// state.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The remote system returned a payload the local model cannot
    /// interpret. The offending entity is not cached.
    #[error("invalid data from remote: {0}")]
    InvalidData(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("JSON error: {:?}", .0)]
    Json(#[from] serde_json::Error),
    /// Generic request failure surfaced unchanged from the REST
    /// collaborator.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
