//! The dispatcher: one bounded tick at a time
//!
//! A tick is started by an external scheduler (or by "process now") and
//! runs to completion inside the process that started it. Nothing survives
//! between ticks except what is in the store: records, campaign status, the
//! dispatch lock and the rate bucket.

mod delivery;
mod finalize;
mod process;
mod sweep;

use std::{sync::Arc, time::Duration};

use herald_common::{Clock, SystemClock};
use herald_store::Store;
use serde::{Deserialize, Serialize};

use crate::{
    lock::DispatchLock,
    policy::RetryPolicy,
    rate_limiter::RateLimitConfig,
    stats::StatsAggregator,
    transport::Transport,
};

const fn default_batch_size() -> usize {
    100
}

const fn default_time_budget() -> u64 {
    50
}

const fn default_lock_ttl() -> u64 {
    300 // 5 minutes
}

const fn default_stale_sending_after() -> u64 {
    900 // 15 minutes
}

const fn default_send_timeout() -> u64 {
    60
}

const fn default_retention_days() -> u32 {
    30
}

/// Tick sizing and timing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Most records loaded by one tick
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Wall-clock time a tick may spend sending (in seconds). No new send
    /// starts once it has run out.
    ///
    /// Default: 50 seconds
    #[serde(default = "default_time_budget")]
    pub time_budget_secs: u64,

    /// A lock older than this is considered abandoned (in seconds).
    ///
    /// Should comfortably exceed `time_budget_secs + send_timeout_secs`.
    ///
    /// Default: 300 seconds
    #[serde(default = "default_lock_ttl")]
    pub lock_ttl_secs: u64,

    /// Records left in `sending` for longer than this are returned to
    /// pending at the start of the next tick (in seconds).
    ///
    /// Default: 900 seconds
    #[serde(default = "default_stale_sending_after")]
    pub stale_sending_after_secs: u64,

    /// Upper bound on a single transport call (in seconds)
    ///
    /// Default: 60 seconds
    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,

    /// Finished records older than this are removed by `ClearQueue`
    ///
    /// Default: 30 days
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            time_budget_secs: default_time_budget(),
            lock_ttl_secs: default_lock_ttl(),
            stale_sending_after_secs: default_stale_sending_after(),
            send_timeout_secs: default_send_timeout(),
            retention_days: default_retention_days(),
        }
    }
}

impl DispatchConfig {
    #[must_use]
    pub const fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }
}

/// Drains pending delivery records in bounded ticks
#[derive(Debug, Clone)]
pub struct Dispatcher {
    store: Arc<dyn Store>,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    config: DispatchConfig,
    retry: RetryPolicy,
    rate_limit: RateLimitConfig,
    lock: DispatchLock,
    stats: StatsAggregator,
}

impl Dispatcher {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, transport: Arc<dyn Transport>) -> Self {
        let config = DispatchConfig::default();
        Self {
            lock: DispatchLock::new(store.clone(), config.lock_ttl_secs),
            stats: StatsAggregator::new(store.clone()),
            store,
            transport,
            clock: Arc::new(SystemClock),
            config,
            retry: RetryPolicy::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: DispatchConfig) -> Self {
        self.lock = DispatchLock::new(self.store.clone(), config.lock_ttl_secs);
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    #[must_use]
    pub const fn config(&self) -> &DispatchConfig {
        &self.config
    }

    #[must_use]
    pub const fn lock(&self) -> &DispatchLock {
        &self.lock
    }
}
