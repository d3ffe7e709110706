//! Policy abstractions for dispatch
//!
//! - [`RetryPolicy`]: whether a transient failure is retried, and when

pub mod retry;

pub use retry::RetryPolicy;
