//! Error types for control operations

use herald_delivery::{DispatchError, QueueError};
use thiserror::Error;

/// Errors that can occur during control operations
#[derive(Debug, Error)]
pub enum ControlError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    /// The request was built for another protocol version
    #[error("Incompatible protocol version: request={got}, handler={expected}")]
    IncompatibleVersion { got: u32, expected: u32 },

    /// The handler answered with an error response
    #[error("Server error: {0}")]
    ServerError(String),
}

/// Result type for control operations
pub type Result<T> = std::result::Result<T, ControlError>;
