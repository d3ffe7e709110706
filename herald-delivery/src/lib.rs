//! Campaign queueing and tick-based dispatch
//!
//! This crate provides functionality to:
//! - Turn a ready campaign into pending delivery records
//! - Drain those records in bounded, lock-protected ticks under a rate limit
//! - Classify send failures and retry transient ones with backoff
//! - Keep campaign statistics in line with delivery records

pub mod error;
pub mod lock;
pub mod policy;
mod processor;
pub mod queue;
pub mod rate_limiter;
mod service;
pub mod stats;
pub mod transport;
mod types;

// Re-export error types
pub use error::{
    DeliveryError, DispatchError, PermanentError, QueueError, SystemError, TemporaryError,
};
// Re-export core types
pub use lock::DispatchLock;
pub use policy::RetryPolicy;
pub use processor::{DispatchConfig, Dispatcher};
pub use queue::QueueManager;
pub use rate_limiter::{RateLimitConfig, RateLimiter};
pub use service::{DispatchControl, DispatchService, ServiceConfig};
pub use stats::StatsAggregator;
pub use transport::{
    LogTransport, OutboundMessage, SendOutcome, SmtpConfig, SmtpTimeouts, SmtpTransport,
    Transport, TransportConfig,
};
pub use types::{
    ClearReport, EnqueueReport, QueueStatus, ScheduledTick, StopReason, SweepReport,
    TickOutcome, TickReport,
};
