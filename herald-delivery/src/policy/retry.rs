//! Retry policy for transient delivery failures.
//!
//! Kept separate from the dispatcher so the backoff schedule can be tested
//! on its own.

use chrono::{DateTime, Utc};
use herald_common::saturating_add_secs;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts before a record is failed for good.
    ///
    /// Default: 5 attempts
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,

    /// Base delay for the quadratic backoff (in seconds).
    ///
    /// The delay after attempt `n` is `n² × base`.
    ///
    /// Default: 60 seconds
    #[serde(default = "defaults::base_retry_delay_secs")]
    pub base_retry_delay_secs: u64,

    /// Upper bound on a single backoff (in seconds).
    ///
    /// Default: 86400 seconds (24 hours)
    #[serde(default = "defaults::max_retry_delay_secs")]
    pub max_retry_delay_secs: u64,

    /// Randomizes each delay within ±`retry_jitter_factor`.
    ///
    /// Default: 0.0 (no jitter)
    #[serde(default = "defaults::retry_jitter_factor")]
    pub retry_jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: defaults::max_attempts(),
            base_retry_delay_secs: defaults::base_retry_delay_secs(),
            max_retry_delay_secs: defaults::max_retry_delay_secs(),
            retry_jitter_factor: defaults::retry_jitter_factor(),
        }
    }
}

impl RetryPolicy {
    /// Whether a record that has made `attempt_count` attempts gets another.
    #[must_use]
    pub const fn should_retry(&self, attempt_count: u32) -> bool {
        attempt_count < self.max_attempts
    }

    /// Backoff after `attempt_count` attempts, before jitter:
    /// `min(attempt_count² × base, max)`.
    #[must_use]
    pub fn base_delay_secs(&self, attempt_count: u32) -> u64 {
        let attempts = u64::from(attempt_count);
        attempts
            .saturating_mul(attempts)
            .saturating_mul(self.base_retry_delay_secs)
            .min(self.max_retry_delay_secs)
    }

    /// Backoff after `attempt_count` attempts with jitter applied.
    #[must_use]
    pub fn delay_secs(&self, attempt_count: u32) -> u64 {
        let delay = self.base_delay_secs(attempt_count);
        if self.retry_jitter_factor <= 0.0 || delay == 0 {
            return delay;
        }

        #[allow(
            clippy::cast_precision_loss,
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss
        )]
        let jittered = {
            let jitter_range = (delay as f64) * self.retry_jitter_factor;
            let jitter: f64 = rand::rng().random_range(-jitter_range..=jitter_range);
            ((delay as f64) + jitter).max(0.0) as u64
        };

        jittered
    }

    /// When a record that has made `attempt_count` attempts may be retried.
    #[must_use]
    pub fn next_attempt_at(&self, attempt_count: u32, now: DateTime<Utc>) -> DateTime<Utc> {
        saturating_add_secs(now, self.delay_secs(attempt_count))
    }
}

mod defaults {
    pub const fn max_attempts() -> u32 {
        5
    }

    pub const fn base_retry_delay_secs() -> u64 {
        60
    }

    pub const fn max_retry_delay_secs() -> u64 {
        86400 // 24 hours
    }

    pub const fn retry_jitter_factor() -> f64 {
        0.0
    }
}
