use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use herald_common::{
    Campaign, CampaignId, CampaignStatus, Counter, DeliveryRecord, RecordKey, StatusCounts,
    Subscriber, SubscriberId, SubscriberStatus,
};

use super::memory::MemoryStore;
use crate::{
    StoreError,
    r#trait::Store,
    types::{BucketState, LockState},
};

/// Memory store that can be told to fail
///
/// Used to exercise the "store went away mid-tick" paths. Failures are
/// reported as [`StoreError::Unavailable`].
#[derive(Debug, Clone)]
pub struct FaultyStore {
    inner: MemoryStore,
    unavailable: Arc<AtomicBool>,
    /// Mutations still allowed before failures start
    writes_left: Arc<AtomicUsize>,
    /// Mutations to fail once `writes_left` runs out; `usize::MAX` fails
    /// all of them
    failures_left: Arc<AtomicUsize>,
}

impl Default for FaultyStore {
    fn default() -> Self {
        Self::new(MemoryStore::new())
    }
}

impl FaultyStore {
    #[must_use]
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            unavailable: Arc::new(AtomicBool::new(false)),
            writes_left: Arc::new(AtomicUsize::new(usize::MAX)),
            failures_left: Arc::new(AtomicUsize::new(usize::MAX)),
        }
    }

    /// Access the wrapped store directly, bypassing fault injection
    #[must_use]
    pub const fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    /// Fail every operation until switched back
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Allow `count` more mutations, then fail the rest
    pub fn fail_writes_after(&self, count: usize) {
        self.failures_left.store(usize::MAX, Ordering::SeqCst);
        self.writes_left.store(count, Ordering::SeqCst);
    }

    /// Allow `count` more mutations, fail the next one, then carry on
    pub fn fail_one_write_after(&self, count: usize) {
        self.failures_left.store(1, Ordering::SeqCst);
        self.writes_left.store(count, Ordering::SeqCst);
    }

    /// Stop failing
    pub fn heal(&self) {
        self.set_unavailable(false);
        self.writes_left.store(usize::MAX, Ordering::SeqCst);
        self.failures_left.store(usize::MAX, Ordering::SeqCst);
    }

    fn check(&self) -> crate::Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected outage".to_string()));
        }
        Ok(())
    }

    fn check_write(&self) -> crate::Result<()> {
        self.check()?;
        if countdown(&self.writes_left) {
            return Ok(());
        }
        if countdown(&self.failures_left) {
            return Err(StoreError::Unavailable("injected write failure".to_string()));
        }
        Ok(())
    }
}

/// Take one from `counter` unless it is already zero. `usize::MAX` never
/// runs down.
fn countdown(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
            0 => None,
            usize::MAX => Some(usize::MAX),
            n => Some(n - 1),
        })
        .is_ok()
}

#[async_trait]
impl Store for FaultyStore {
    async fn upsert_subscriber(&self, subscriber: Subscriber) -> crate::Result<()> {
        self.check_write()?;
        self.inner.upsert_subscriber(subscriber).await
    }

    async fn subscriber(&self, id: SubscriberId) -> crate::Result<Option<Subscriber>> {
        self.check()?;
        self.inner.subscriber(id).await
    }

    async fn subscribers(&self) -> crate::Result<Vec<Subscriber>> {
        self.check()?;
        self.inner.subscribers().await
    }

    async fn mark_subscriber(
        &self,
        id: SubscriberId,
        status: SubscriberStatus,
    ) -> crate::Result<bool> {
        self.check_write()?;
        self.inner.mark_subscriber(id, status).await
    }

    async fn reactivate_subscriber(&self, id: SubscriberId) -> crate::Result<bool> {
        self.check_write()?;
        self.inner.reactivate_subscriber(id).await
    }

    async fn insert_campaign(&self, campaign: Campaign) -> crate::Result<()> {
        self.check_write()?;
        self.inner.insert_campaign(campaign).await
    }

    async fn campaign(&self, id: CampaignId) -> crate::Result<Option<Campaign>> {
        self.check()?;
        self.inner.campaign(id).await
    }

    async fn campaigns(&self) -> crate::Result<Vec<Campaign>> {
        self.check()?;
        self.inner.campaigns().await
    }

    async fn transition_campaign(
        &self,
        id: CampaignId,
        expected: CampaignStatus,
        next: CampaignStatus,
        at: DateTime<Utc>,
    ) -> crate::Result<bool> {
        self.check_write()?;
        self.inner.transition_campaign(id, expected, next, at).await
    }

    async fn increment_counter(
        &self,
        id: CampaignId,
        counter: Counter,
        amount: u64,
    ) -> crate::Result<u64> {
        self.check_write()?;
        self.inner.increment_counter(id, counter, amount).await
    }

    async fn refresh_total_sent(&self, id: CampaignId) -> crate::Result<u64> {
        self.check_write()?;
        self.inner.refresh_total_sent(id).await
    }

    async fn insert_records(&self, records: Vec<DeliveryRecord>) -> crate::Result<usize> {
        self.check_write()?;
        self.inner.insert_records(records).await
    }

    async fn record(&self, key: RecordKey) -> crate::Result<Option<DeliveryRecord>> {
        self.check()?;
        self.inner.record(key).await
    }

    async fn records_for_campaign(&self, id: CampaignId) -> crate::Result<Vec<DeliveryRecord>> {
        self.check()?;
        self.inner.records_for_campaign(id).await
    }

    async fn pending_batch(
        &self,
        campaigns: &[CampaignId],
        limit: usize,
        now: DateTime<Utc>,
    ) -> crate::Result<Vec<DeliveryRecord>> {
        self.check()?;
        self.inner.pending_batch(campaigns, limit, now).await
    }

    async fn update_record(&self, record: &DeliveryRecord) -> crate::Result<()> {
        self.check_write()?;
        self.inner.update_record(record).await
    }

    async fn count_by_status(&self, campaign: Option<CampaignId>) -> crate::Result<StatusCounts> {
        self.check()?;
        self.inner.count_by_status(campaign).await
    }

    async fn remove_terminal_before(&self, cutoff: DateTime<Utc>) -> crate::Result<usize> {
        self.check_write()?;
        self.inner.remove_terminal_before(cutoff).await
    }

    async fn requeue_stale_sending(
        &self,
        older_than: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> crate::Result<usize> {
        self.check_write()?;
        self.inner.requeue_stale_sending(older_than, now).await
    }

    async fn try_acquire_lock(
        &self,
        key: &str,
        now: DateTime<Utc>,
        ttl_secs: u64,
    ) -> crate::Result<bool> {
        self.check_write()?;
        self.inner.try_acquire_lock(key, now, ttl_secs).await
    }

    async fn release_lock(&self, key: &str) -> crate::Result<()> {
        // Exempt from injected faults
        self.inner.release_lock(key).await
    }

    async fn lock_state(&self, key: &str) -> crate::Result<Option<LockState>> {
        self.check()?;
        self.inner.lock_state(key).await
    }

    async fn load_bucket(&self, key: &str) -> crate::Result<Option<BucketState>> {
        self.check()?;
        self.inner.load_bucket(key).await
    }

    async fn save_bucket(&self, key: &str, state: BucketState) -> crate::Result<()> {
        self.check_write()?;
        self.inner.save_bucket(key, state).await
    }
}
