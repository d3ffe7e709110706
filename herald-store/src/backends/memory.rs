use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use herald_common::{
    Campaign, CampaignId, CampaignStatus, Counter, DeliveryRecord, RecordKey, StatusCounts,
    Subscriber, SubscriberId, SubscriberStatus,
};
use parking_lot::Mutex;

use crate::{
    state::StoreState,
    r#trait::Store,
    types::{BucketState, LockState},
};

/// In-memory store
///
/// All state sits behind a single mutex, so every operation is trivially
/// atomic. Intended for tests and dry runs; nothing survives the process.
///
/// # Capacity Management
/// An optional capacity bounds the number of delivery records. Inserts that
/// would exceed it fail as a whole.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
    capacity: Option<usize>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a memory store holding at most `capacity` delivery records
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Arc::default(),
            capacity: Some(capacity),
        }
    }

    /// Number of delivery records currently held
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().record_count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_subscriber(&self, subscriber: Subscriber) -> crate::Result<()> {
        self.state.lock().upsert_subscriber(subscriber)
    }

    async fn subscriber(&self, id: SubscriberId) -> crate::Result<Option<Subscriber>> {
        Ok(self.state.lock().subscriber(id))
    }

    async fn subscribers(&self) -> crate::Result<Vec<Subscriber>> {
        Ok(self.state.lock().subscribers())
    }

    async fn mark_subscriber(
        &self,
        id: SubscriberId,
        status: SubscriberStatus,
    ) -> crate::Result<bool> {
        self.state.lock().mark_subscriber(id, status)
    }

    async fn reactivate_subscriber(&self, id: SubscriberId) -> crate::Result<bool> {
        self.state.lock().reactivate_subscriber(id)
    }

    async fn insert_campaign(&self, campaign: Campaign) -> crate::Result<()> {
        self.state.lock().insert_campaign(campaign)
    }

    async fn campaign(&self, id: CampaignId) -> crate::Result<Option<Campaign>> {
        Ok(self.state.lock().campaign(id))
    }

    async fn campaigns(&self) -> crate::Result<Vec<Campaign>> {
        Ok(self.state.lock().campaigns())
    }

    async fn transition_campaign(
        &self,
        id: CampaignId,
        expected: CampaignStatus,
        next: CampaignStatus,
        at: DateTime<Utc>,
    ) -> crate::Result<bool> {
        self.state
            .lock()
            .transition_campaign(id, expected, next, at)
    }

    async fn increment_counter(
        &self,
        id: CampaignId,
        counter: Counter,
        amount: u64,
    ) -> crate::Result<u64> {
        self.state.lock().increment_counter(id, counter, amount)
    }

    async fn refresh_total_sent(&self, id: CampaignId) -> crate::Result<u64> {
        self.state.lock().refresh_total_sent(id)
    }

    async fn insert_records(&self, records: Vec<DeliveryRecord>) -> crate::Result<usize> {
        self.state.lock().insert_records(records, self.capacity)
    }

    async fn record(&self, key: RecordKey) -> crate::Result<Option<DeliveryRecord>> {
        Ok(self.state.lock().record(key))
    }

    async fn records_for_campaign(&self, id: CampaignId) -> crate::Result<Vec<DeliveryRecord>> {
        Ok(self.state.lock().records_for_campaign(id))
    }

    async fn pending_batch(
        &self,
        campaigns: &[CampaignId],
        limit: usize,
        now: DateTime<Utc>,
    ) -> crate::Result<Vec<DeliveryRecord>> {
        Ok(self.state.lock().pending_batch(campaigns, limit, now))
    }

    async fn update_record(&self, record: &DeliveryRecord) -> crate::Result<()> {
        self.state.lock().update_record(record)
    }

    async fn count_by_status(&self, campaign: Option<CampaignId>) -> crate::Result<StatusCounts> {
        Ok(self.state.lock().count_by_status(campaign))
    }

    async fn remove_terminal_before(&self, cutoff: DateTime<Utc>) -> crate::Result<usize> {
        Ok(self.state.lock().remove_terminal_before(cutoff))
    }

    async fn requeue_stale_sending(
        &self,
        older_than: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> crate::Result<usize> {
        Ok(self.state.lock().requeue_stale_sending(older_than, now))
    }

    async fn try_acquire_lock(
        &self,
        key: &str,
        now: DateTime<Utc>,
        ttl_secs: u64,
    ) -> crate::Result<bool> {
        Ok(self.state.lock().try_acquire_lock(key, now, ttl_secs))
    }

    async fn release_lock(&self, key: &str) -> crate::Result<()> {
        self.state.lock().release_lock(key);
        Ok(())
    }

    async fn lock_state(&self, key: &str) -> crate::Result<Option<LockState>> {
        Ok(self.state.lock().lock(key))
    }

    async fn load_bucket(&self, key: &str) -> crate::Result<Option<BucketState>> {
        Ok(self.state.lock().bucket(key))
    }

    async fn save_bucket(&self, key: &str, state: BucketState) -> crate::Result<()> {
        self.state.lock().save_bucket(key, state);
        Ok(())
    }
}
