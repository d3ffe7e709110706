use std::io;

use thiserror::Error;

/// Errors from a relay session
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Relay connection failed: {0}")]
    Io(#[from] io::Error),

    #[error("Malformed relay reply: {0}")]
    Malformed(String),

    /// The relay answered a command with a failure reply.
    #[error("Relay replied {code}: {text}")]
    Rejected { code: u16, text: String },

    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("Relay closed the connection")]
    Closed,
}

pub type Result<T> = std::result::Result<T, RelayError>;
