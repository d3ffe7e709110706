//! Error types for the herald-store crate.

use std::io;

use herald_common::ModelError;
use thiserror::Error;

/// Top-level store error type.
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O operation failed (snapshot read/write, lock file).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Snapshot could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    /// Store path validation failed.
    #[error("Store validation error: {0}")]
    Validation(#[from] ValidationError),

    /// An entity does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// A uniqueness constraint would be violated.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The store refused the operation because it is full.
    #[error("Store capacity of {capacity} delivery records exceeded")]
    CapacityExceeded { capacity: usize },

    /// The requested change breaks a model rule.
    #[error(transparent)]
    Model(#[from] ModelError),

    /// The store cannot be reached at all.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Internal error (lock contention, corrupted state, etc.).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl StoreError {
    pub(crate) fn campaign_not_found(id: impl ToString) -> Self {
        Self::NotFound {
            kind: "Campaign",
            id: id.to_string(),
        }
    }

    pub(crate) fn subscriber_not_found(id: impl ToString) -> Self {
        Self::NotFound {
            kind: "Subscriber",
            id: id.to_string(),
        }
    }

    pub(crate) fn record_not_found(id: impl ToString) -> Self {
        Self::NotFound {
            kind: "Delivery record",
            id: id.to_string(),
        }
    }
}

/// Serialization and deserialization errors.
#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("Bincode encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("Bincode decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),
}

/// Store path validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Store path cannot contain '..' components: {0}")]
    ParentDir(String),

    #[error("Store path must be absolute: {0}")]
    NotAbsolute(String),

    #[error("Store path cannot be in system directory {prefix}: {path}")]
    SystemDirectory { prefix: &'static str, path: String },

    #[error("Store path is not a directory: {0}")]
    NotDirectory(String),
}

/// Specialized `Result` type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
