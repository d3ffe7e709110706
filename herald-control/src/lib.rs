//! Control commands for herald
//!
//! Every operator action (the CLI, a cron wrapper, an admin surface) is
//! expressed as a versioned [`Request`] and answered with a [`Response`], so
//! the callers never reach into the dispatch service directly.

pub mod error;
pub mod handler;
pub mod protocol;

pub use error::{ControlError, Result};
pub use handler::{CommandHandler, DispatchHandler};
pub use protocol::{
    Command, PROTOCOL_VERSION, Request, Response, ResponseData, ResponsePayload, TrackEvent,
};
