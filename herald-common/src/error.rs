//! Error types for the herald-common crate.

use thiserror::Error;

/// Errors raised by the domain model itself.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    /// An identifier could not be parsed.
    #[error("Invalid {kind} id '{value}': {reason}")]
    InvalidId {
        kind: &'static str,
        value: String,
        reason: String,
    },

    /// A status string could not be parsed.
    #[error("Unknown {kind} status: {value}")]
    UnknownStatus { kind: &'static str, value: String },

    /// A status transition is not allowed by the state machine.
    #[error("Invalid {kind} transition from {from} to {to}")]
    InvalidTransition {
        kind: &'static str,
        from: String,
        to: String,
    },
}
