//! Send rate limiting using the token bucket algorithm
//!
//! One bucket covers every send herald makes. Because a tick is short-lived,
//! the bucket's state is loaded from the store when the tick starts and saved
//! back when it ends, so the limit holds across ticks that run more often
//! than the bucket refills.
//!
//! # Token Bucket Algorithm
//!
//! - Tokens are added to the bucket at a constant rate (`messages_per_second`)
//! - Each message consumes one token
//! - If no tokens are available the tick stops; nothing ever waits
//! - The bucket holds at most `burst_size` tokens
//!
//! ```text
//! Rate limit: 10 msg/sec, burst: 20
//! - Bucket starts with 20 tokens
//! - Tokens refill at 10/sec
//! - 20 messages can go out immediately (burst)
//! - Then limited to 10/sec sustained rate
//! ```

use std::time::Duration;

use chrono::{DateTime, Utc};
use herald_common::tracing;
use herald_store::{BucketState, Store};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Store key of the persisted bucket
pub const BUCKET_KEY: &str = "dispatch";

/// Configuration for rate limiting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Sustained sends per second
    #[serde(default = "default_messages_per_second")]
    pub messages_per_second: f64,

    /// Max tokens in the bucket
    #[serde(default = "default_burst_size")]
    pub burst_size: u32,

    /// Keep the bucket in the store between ticks. When `false` every tick
    /// starts with a full bucket.
    #[serde(default = "default_persist")]
    pub persist: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            messages_per_second: default_messages_per_second(),
            burst_size: default_burst_size(),
            persist: default_persist(),
        }
    }
}

const fn default_messages_per_second() -> f64 {
    10.0
}

const fn default_burst_size() -> u32 {
    20
}

const fn default_persist() -> bool {
    true
}

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_rate: f64,
    last_refill: DateTime<Utc>,
}

impl TokenBucket {
    /// A full bucket
    fn new(messages_per_second: f64, burst_size: u32, now: DateTime<Utc>) -> Self {
        let capacity = f64::from(burst_size);
        Self {
            tokens: capacity,
            capacity,
            refill_rate: messages_per_second,
            last_refill: now,
        }
    }

    /// Resume from persisted state. The token count is clamped in case the
    /// burst size was lowered since it was saved.
    fn restore(messages_per_second: f64, burst_size: u32, state: BucketState) -> Self {
        let capacity = f64::from(burst_size);
        Self {
            tokens: state.tokens.clamp(0.0, capacity),
            capacity,
            refill_rate: messages_per_second,
            last_refill: state.last_refill,
        }
    }

    fn refill(&mut self, now: DateTime<Utc>) {
        // A clock that went backwards adds nothing.
        let Ok(elapsed) = (now - self.last_refill).to_std() else {
            return;
        };

        let tokens_to_add = elapsed.as_secs_f64() * self.refill_rate;
        self.tokens = (self.tokens + tokens_to_add).min(self.capacity);
        self.last_refill = now;
    }

    fn try_consume(&mut self, n: u32, now: DateTime<Utc>) -> bool {
        self.refill(now);

        let n = f64::from(n);
        if self.tokens >= n {
            self.tokens -= n;
            true
        } else {
            false
        }
    }

    fn time_until_available(&mut self, now: DateTime<Utc>) -> Duration {
        self.refill(now);

        if self.tokens >= 1.0 {
            return Duration::ZERO;
        }

        if self.refill_rate <= 0.0 {
            return Duration::MAX;
        }

        let tokens_needed = 1.0 - self.tokens;
        Duration::try_from_secs_f64(tokens_needed / self.refill_rate).unwrap_or(Duration::MAX)
    }

    const fn state(&self) -> BucketState {
        BucketState {
            tokens: self.tokens,
            last_refill: self.last_refill,
        }
    }
}

/// Rate limiter for one tick
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    bucket: Mutex<TokenBucket>,
}

impl RateLimiter {
    /// A limiter starting from a full bucket
    #[must_use]
    pub fn new(config: RateLimitConfig, now: DateTime<Utc>) -> Self {
        let bucket = TokenBucket::new(config.messages_per_second, config.burst_size, now);
        Self {
            config,
            bucket: Mutex::new(bucket),
        }
    }

    /// Resume the persisted bucket, or start full if there is none or
    /// persistence is off.
    ///
    /// # Errors
    /// Returns the store error if the bucket cannot be read.
    pub async fn load(
        config: RateLimitConfig,
        store: &dyn Store,
        now: DateTime<Utc>,
    ) -> herald_store::Result<Self> {
        if !config.persist {
            return Ok(Self::new(config, now));
        }

        let bucket = match store.load_bucket(BUCKET_KEY).await? {
            Some(state) => {
                TokenBucket::restore(config.messages_per_second, config.burst_size, state)
            }
            None => TokenBucket::new(config.messages_per_second, config.burst_size, now),
        };

        Ok(Self {
            config,
            bucket: Mutex::new(bucket),
        })
    }

    /// Take `n` tokens if they are all available. Never waits.
    pub fn try_consume(&self, n: u32, now: DateTime<Utc>) -> bool {
        let mut bucket = self.bucket.lock();
        if bucket.try_consume(n, now) {
            return true;
        }

        let wait_time = bucket.time_until_available(now);
        drop(bucket);
        tracing::debug!(
            wait_seconds = wait_time.as_secs_f64(),
            "Rate limit exhausted"
        );
        false
    }

    /// Write the bucket back to the store. A no-op when persistence is off.
    ///
    /// # Errors
    /// Returns the store error if the bucket cannot be written.
    pub async fn persist(&self, store: &dyn Store) -> herald_store::Result<()> {
        if !self.config.persist {
            return Ok(());
        }

        let state = self.bucket.lock().state();
        store.save_bucket(BUCKET_KEY, state).await
    }
}
