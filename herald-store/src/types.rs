use chrono::{DateTime, Utc};
use herald_common::saturating_add_secs;
use serde::{Deserialize, Serialize};

/// Persisted token bucket so the rate limit holds across short-lived ticks
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BucketState {
    pub tokens: f64,
    pub last_refill: DateTime<Utc>,
}

/// A held dispatch lock
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockState {
    pub key: String,
    pub acquired_at: DateTime<Utc>,
    pub ttl_secs: u64,
}

impl LockState {
    /// A lock past its TTL is abandoned and may be reclaimed.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        saturating_add_secs(self.acquired_at, self.ttl_secs) <= now
    }
}
