use chrono::{DateTime, Utc};
use herald_common::{
    Campaign, CampaignId, CampaignStatus, Counter, DeliveryRecord, RecordKey, StatusCounts,
    Subscriber, SubscriberId, SubscriberStatus,
};

use crate::types::{BucketState, LockState};

/// Persistence for subscribers, campaigns, delivery records, the dispatch
/// lock and the rate bucket.
///
/// Every method is atomic with respect to every other method on the same
/// store, including across processes for the file backend. Anything that
/// must be a read-modify-write (status transitions, counters, the lock) is a
/// single method here rather than a get followed by a put.
#[async_trait::async_trait]
pub trait Store: Send + Sync + std::fmt::Debug {
    /// Insert or replace a subscriber.
    ///
    /// # Errors
    /// [`StoreError::Conflict`](crate::StoreError::Conflict) if another
    /// subscriber already owns the email address.
    async fn upsert_subscriber(&self, subscriber: Subscriber) -> crate::Result<()>;

    async fn subscriber(&self, id: SubscriberId) -> crate::Result<Option<Subscriber>>;

    async fn subscribers(&self) -> crate::Result<Vec<Subscriber>>;

    /// Apply an automatic status change (bounce, unsubscribe). Sticky
    /// statuses are never left. Returns whether the status changed.
    async fn mark_subscriber(
        &self,
        id: SubscriberId,
        status: SubscriberStatus,
    ) -> crate::Result<bool>;

    /// Manually return a subscriber to active.
    async fn reactivate_subscriber(&self, id: SubscriberId) -> crate::Result<bool>;

    async fn insert_campaign(&self, campaign: Campaign) -> crate::Result<()>;

    async fn campaign(&self, id: CampaignId) -> crate::Result<Option<Campaign>>;

    async fn campaigns(&self) -> crate::Result<Vec<Campaign>>;

    /// Move a campaign from `expected` to `next`.
    ///
    /// Returns `false` without changing anything if the campaign is not in
    /// `expected`. Finishing statuses stamp `sent_at` with `at`.
    async fn transition_campaign(
        &self,
        id: CampaignId,
        expected: CampaignStatus,
        next: CampaignStatus,
        at: DateTime<Utc>,
    ) -> crate::Result<bool>;

    /// Atomically add to a campaign counter, returning the new value.
    async fn increment_counter(
        &self,
        id: CampaignId,
        counter: Counter,
        amount: u64,
    ) -> crate::Result<u64>;

    /// Recompute `total_sent` as live sent records plus the archived tally,
    /// in one step, returning the new value.
    async fn refresh_total_sent(&self, id: CampaignId) -> crate::Result<u64>;

    /// Bulk insert. Records whose key already exists are skipped; the
    /// number actually inserted is returned.
    async fn insert_records(&self, records: Vec<DeliveryRecord>) -> crate::Result<usize>;

    async fn record(&self, key: RecordKey) -> crate::Result<Option<DeliveryRecord>>;

    async fn records_for_campaign(&self, id: CampaignId) -> crate::Result<Vec<DeliveryRecord>>;

    /// Up to `limit` pending records of `campaigns` that are ready at `now`,
    /// in insertion order.
    async fn pending_batch(
        &self,
        campaigns: &[CampaignId],
        limit: usize,
        now: DateTime<Utc>,
    ) -> crate::Result<Vec<DeliveryRecord>>;

    async fn update_record(&self, record: &DeliveryRecord) -> crate::Result<()>;

    async fn count_by_status(&self, campaign: Option<CampaignId>) -> crate::Result<StatusCounts>;

    /// Delete terminal records whose last update is before `cutoff`.
    async fn remove_terminal_before(&self, cutoff: DateTime<Utc>) -> crate::Result<usize>;

    /// Return records left in `sending` since before `older_than` to pending.
    async fn requeue_stale_sending(
        &self,
        older_than: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> crate::Result<usize>;

    /// Take `key` if it is free or its holder's TTL has run out.
    async fn try_acquire_lock(
        &self,
        key: &str,
        now: DateTime<Utc>,
        ttl_secs: u64,
    ) -> crate::Result<bool>;

    /// Clear `key` unconditionally. Releasing a free lock is a no-op.
    async fn release_lock(&self, key: &str) -> crate::Result<()>;

    async fn lock_state(&self, key: &str) -> crate::Result<Option<LockState>>;

    async fn load_bucket(&self, key: &str) -> crate::Result<Option<BucketState>>;

    async fn save_bucket(&self, key: &str, state: BucketState) -> crate::Result<()>;
}
