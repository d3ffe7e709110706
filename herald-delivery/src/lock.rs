//! The dispatch lock
//!
//! At most one tick runs at a time. The lock lives in the store so it holds
//! across processes; a holder that died is detected by the lock's TTL.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use herald_common::internal;
use herald_store::{LockState, Store};

/// Store key of the dispatch lock
pub const DISPATCH_LOCK_KEY: &str = "dispatch";

#[derive(Debug, Clone)]
pub struct DispatchLock {
    store: Arc<dyn Store>,
    key: String,
    ttl_secs: u64,
}

impl DispatchLock {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, ttl_secs: u64) -> Self {
        Self::with_key(store, DISPATCH_LOCK_KEY, ttl_secs)
    }

    #[must_use]
    pub fn with_key(store: Arc<dyn Store>, key: impl Into<String>, ttl_secs: u64) -> Self {
        Self {
            store,
            key: key.into(),
            ttl_secs,
        }
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Take the lock if it is free or its holder's TTL has run out.
    ///
    /// # Errors
    /// Returns the store error if the lock row cannot be written.
    pub async fn acquire(&self, now: DateTime<Utc>) -> herald_store::Result<bool> {
        if let Some(held) = self.store.lock_state(&self.key).await?
            && held.is_expired(now)
        {
            internal!(
                level = WARN,
                "Reclaiming abandoned dispatch lock '{}' acquired at {}",
                self.key,
                held.acquired_at
            );
        }

        self.store
            .try_acquire_lock(&self.key, now, self.ttl_secs)
            .await
    }

    /// Clear the lock. Releasing a free lock is a no-op.
    ///
    /// # Errors
    /// Returns the store error if the lock row cannot be cleared.
    pub async fn release(&self) -> herald_store::Result<()> {
        self.store.release_lock(&self.key).await
    }

    /// The current holder, if any.
    ///
    /// # Errors
    /// Returns the store error if the lock row cannot be read.
    pub async fn state(&self) -> herald_store::Result<Option<LockState>> {
        self.store.lock_state(&self.key).await
    }
}
