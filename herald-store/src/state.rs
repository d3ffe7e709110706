//! The complete persisted state and the operations over it
//!
//! Both backends hold a [`StoreState`] and run every operation against it
//! while holding exclusive access, which is what makes each operation atomic.

use std::collections::BTreeMap;

use ahash::AHashSet;
use chrono::{DateTime, Utc};
use herald_common::{
    Campaign, CampaignId, CampaignStatus, Counter, DeliveryRecord, RecordKey, RecordStatus,
    StatusCounts, Subscriber, SubscriberId, SubscriberStatus,
};
use serde::{Deserialize, Serialize};

use crate::{
    StoreError,
    error::Result,
    types::{BucketState, LockState},
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreState {
    subscribers: BTreeMap<SubscriberId, Subscriber>,
    campaigns: BTreeMap<CampaignId, Campaign>,
    records: BTreeMap<RecordKey, DeliveryRecord>,
    locks: BTreeMap<String, LockState>,
    buckets: BTreeMap<String, BucketState>,
    next_sequence: u64,
}

impl StoreState {
    pub fn upsert_subscriber(&mut self, subscriber: Subscriber) -> Result<()> {
        let taken = self.subscribers.values().any(|existing| {
            existing.id != subscriber.id && existing.email.eq_ignore_ascii_case(&subscriber.email)
        });
        if taken {
            return Err(StoreError::Conflict(format!(
                "email {} already belongs to another subscriber",
                subscriber.email
            )));
        }

        self.subscribers.insert(subscriber.id, subscriber);
        Ok(())
    }

    pub fn subscriber(&self, id: SubscriberId) -> Option<Subscriber> {
        self.subscribers.get(&id).cloned()
    }

    pub fn subscribers(&self) -> Vec<Subscriber> {
        self.subscribers.values().cloned().collect()
    }

    pub fn mark_subscriber(&mut self, id: SubscriberId, status: SubscriberStatus) -> Result<bool> {
        self.subscribers
            .get_mut(&id)
            .map(|subscriber| subscriber.mark(status))
            .ok_or_else(|| StoreError::subscriber_not_found(id))
    }

    pub fn reactivate_subscriber(&mut self, id: SubscriberId) -> Result<bool> {
        self.subscribers
            .get_mut(&id)
            .map(Subscriber::reactivate)
            .ok_or_else(|| StoreError::subscriber_not_found(id))
    }

    pub fn insert_campaign(&mut self, campaign: Campaign) -> Result<()> {
        if self.campaigns.contains_key(&campaign.id) {
            return Err(StoreError::Conflict(format!(
                "campaign {} already exists",
                campaign.id
            )));
        }

        self.campaigns.insert(campaign.id, campaign);
        Ok(())
    }

    pub fn campaign(&self, id: CampaignId) -> Option<Campaign> {
        self.campaigns.get(&id).cloned()
    }

    pub fn campaigns(&self) -> Vec<Campaign> {
        self.campaigns.values().cloned().collect()
    }

    pub fn transition_campaign(
        &mut self,
        id: CampaignId,
        expected: CampaignStatus,
        next: CampaignStatus,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let campaign = self
            .campaigns
            .get_mut(&id)
            .ok_or_else(|| StoreError::campaign_not_found(id))?;

        if campaign.status != expected {
            return Ok(false);
        }

        campaign.transition(next)?;
        if next.is_finished() {
            campaign.sent_at = Some(at);
        }

        Ok(true)
    }

    pub fn increment_counter(
        &mut self,
        id: CampaignId,
        counter: Counter,
        amount: u64,
    ) -> Result<u64> {
        let campaign = self
            .campaigns
            .get_mut(&id)
            .ok_or_else(|| StoreError::campaign_not_found(id))?;
        campaign.counters.add(counter, amount);
        Ok(campaign.counters.get(counter))
    }

    /// Recompute `total_sent` from live sent records plus the archived tally.
    pub fn refresh_total_sent(&mut self, id: CampaignId) -> Result<u64> {
        let live = self.count_by_status(Some(id)).sent;
        let campaign = self
            .campaigns
            .get_mut(&id)
            .ok_or_else(|| StoreError::campaign_not_found(id))?;
        campaign.counters.total_sent = live + campaign.archived.sent;
        Ok(campaign.counters.total_sent)
    }

    /// Insert records, skipping any whose key already exists.
    ///
    /// Either every new record is inserted or, when `capacity` would be
    /// exceeded, none are.
    pub fn insert_records(
        &mut self,
        records: Vec<DeliveryRecord>,
        capacity: Option<usize>,
    ) -> Result<usize> {
        let mut seen = AHashSet::with_capacity(records.len());
        let fresh: Vec<DeliveryRecord> = records
            .into_iter()
            .filter(|record| !self.records.contains_key(&record.key()) && seen.insert(record.key()))
            .collect();

        if let Some(capacity) = capacity
            && self.records.len() + fresh.len() > capacity
        {
            return Err(StoreError::CapacityExceeded { capacity });
        }

        let inserted = fresh.len();
        for mut record in fresh {
            record.sequence = self.next_sequence;
            self.next_sequence += 1;
            self.records.insert(record.key(), record);
        }

        Ok(inserted)
    }

    pub fn record(&self, key: RecordKey) -> Option<DeliveryRecord> {
        self.records.get(&key).cloned()
    }

    pub fn records_for_campaign(&self, id: CampaignId) -> Vec<DeliveryRecord> {
        let mut records: Vec<DeliveryRecord> = self
            .records
            .values()
            .filter(|record| record.campaign_id == id)
            .cloned()
            .collect();
        records.sort_by_key(|record| record.sequence);
        records
    }

    /// Pending records of the given campaigns whose retry gate has passed,
    /// oldest first.
    pub fn pending_batch(
        &self,
        campaigns: &[CampaignId],
        limit: usize,
        now: DateTime<Utc>,
    ) -> Vec<DeliveryRecord> {
        let wanted: AHashSet<CampaignId> = campaigns.iter().copied().collect();
        let mut ready: Vec<&DeliveryRecord> = self
            .records
            .values()
            .filter(|record| wanted.contains(&record.campaign_id) && record.is_ready(now))
            .collect();
        ready.sort_by_key(|record| record.sequence);
        ready.into_iter().take(limit).cloned().collect()
    }

    pub fn update_record(&mut self, record: &DeliveryRecord) -> Result<()> {
        let slot = self
            .records
            .get_mut(&record.key())
            .ok_or_else(|| StoreError::record_not_found(record.key()))?;

        let sequence = slot.sequence;
        *slot = record.clone();
        slot.sequence = sequence;
        Ok(())
    }

    pub fn count_by_status(&self, campaign: Option<CampaignId>) -> StatusCounts {
        self.records
            .values()
            .filter(|record| campaign.is_none_or(|id| record.campaign_id == id))
            .map(|record| record.status)
            .collect()
    }

    /// Delete terminal records last touched before `cutoff`, folding their
    /// outcomes into each campaign's archived tally.
    pub fn remove_terminal_before(&mut self, cutoff: DateTime<Utc>) -> usize {
        let expired: Vec<RecordKey> = self
            .records
            .values()
            .filter(|record| record.status.is_terminal() && record.updated_at < cutoff)
            .map(DeliveryRecord::key)
            .collect();

        for key in &expired {
            let Some(record) = self.records.remove(key) else {
                continue;
            };

            if let Some(campaign) = self.campaigns.get_mut(&record.campaign_id) {
                match record.status {
                    RecordStatus::Sent => campaign.archived.sent += 1,
                    RecordStatus::Failed => campaign.archived.failed += 1,
                    RecordStatus::Skipped => campaign.archived.skipped += 1,
                    RecordStatus::Pending | RecordStatus::Sending => {}
                }
            }
        }

        expired.len()
    }

    /// Return records stuck in `sending` since before `older_than` to pending.
    pub fn requeue_stale_sending(
        &mut self,
        older_than: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> usize {
        let mut requeued = 0;
        for record in self.records.values_mut() {
            if record.status == RecordStatus::Sending && record.updated_at < older_than {
                record.release_claim("requeued after stalled send", now);
                requeued += 1;
            }
        }
        requeued
    }

    pub fn try_acquire_lock(&mut self, key: &str, now: DateTime<Utc>, ttl_secs: u64) -> bool {
        if self
            .locks
            .get(key)
            .is_some_and(|held| !held.is_expired(now))
        {
            return false;
        }

        self.locks.insert(
            key.to_string(),
            LockState {
                key: key.to_string(),
                acquired_at: now,
                ttl_secs,
            },
        );
        true
    }

    pub fn release_lock(&mut self, key: &str) {
        self.locks.remove(key);
    }

    pub fn lock(&self, key: &str) -> Option<LockState> {
        self.locks.get(key).cloned()
    }

    pub fn bucket(&self, key: &str) -> Option<BucketState> {
        self.buckets.get(key).copied()
    }

    pub fn save_bucket(&mut self, key: &str, state: BucketState) {
        self.buckets.insert(key.to_string(), state);
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use chrono::Duration;
    use pretty_assertions::assert_eq;

    use super::*;

    fn campaign(status: CampaignStatus) -> Campaign {
        Campaign::new("Weekly", "<p>hello</p>", Utc::now()).with_status(status)
    }

    #[test]
    fn test_insert_records_skips_duplicates() {
        let mut state = StoreState::default();
        let now = Utc::now();
        let campaign_id = CampaignId::generate();
        let subscriber_id = SubscriberId::generate();

        let first = state
            .insert_records(
                vec![
                    DeliveryRecord::pending(campaign_id, subscriber_id, now),
                    DeliveryRecord::pending(campaign_id, subscriber_id, now),
                ],
                None,
            )
            .unwrap();
        assert_eq!(first, 1);

        let second = state
            .insert_records(
                vec![DeliveryRecord::pending(campaign_id, subscriber_id, now)],
                None,
            )
            .unwrap();
        assert_eq!(second, 0);
        assert_eq!(state.record_count(), 1);
    }

    #[test]
    fn test_insert_records_respects_capacity() {
        let mut state = StoreState::default();
        let now = Utc::now();
        let campaign_id = CampaignId::generate();

        let records = (0..3)
            .map(|_| DeliveryRecord::pending(campaign_id, SubscriberId::generate(), now))
            .collect();
        let err = state.insert_records(records, Some(2)).unwrap_err();

        assert!(matches!(err, StoreError::CapacityExceeded { capacity: 2 }));
        assert_eq!(state.record_count(), 0);
    }

    #[test]
    fn test_pending_batch_is_ordered_and_gated() {
        let mut state = StoreState::default();
        let now = Utc::now();
        let campaign_id = CampaignId::generate();
        let subscribers: Vec<SubscriberId> = (0..4).map(|_| SubscriberId::generate()).collect();

        state
            .insert_records(
                subscribers
                    .iter()
                    .map(|id| DeliveryRecord::pending(campaign_id, *id, now))
                    .collect(),
                None,
            )
            .unwrap();

        let mut gated = state
            .record(RecordKey::new(campaign_id, subscribers[0]))
            .unwrap();
        gated.schedule_retry("421", now + Duration::minutes(5), now);
        state.update_record(&gated).unwrap();

        let batch = state.pending_batch(&[campaign_id], 2, now);
        let ids: Vec<SubscriberId> = batch.iter().map(|r| r.subscriber_id).collect();
        assert_eq!(ids, vec![subscribers[1], subscribers[2]]);

        assert!(state.pending_batch(&[CampaignId::generate()], 10, now).is_empty());
    }

    #[test]
    fn test_transition_campaign_is_compare_and_set() {
        let mut state = StoreState::default();
        let campaign = campaign(CampaignStatus::Sending);
        let id = campaign.id;
        state.insert_campaign(campaign).unwrap();

        let now = Utc::now();
        assert!(
            !state
                .transition_campaign(id, CampaignStatus::Ready, CampaignStatus::Sending, now)
                .unwrap()
        );
        assert!(
            state
                .transition_campaign(id, CampaignStatus::Sending, CampaignStatus::Sent, now)
                .unwrap()
        );

        let stored = state.campaign(id).unwrap();
        assert_eq!(stored.status, CampaignStatus::Sent);
        assert_eq!(stored.sent_at, Some(now));
    }

    #[test]
    fn test_remove_terminal_archives_outcomes() {
        let mut state = StoreState::default();
        let campaign = campaign(CampaignStatus::Sending);
        let id = campaign.id;
        state.insert_campaign(campaign).unwrap();

        let long_ago = Utc::now() - Duration::days(40);
        let subscribers: Vec<SubscriberId> = (0..3).map(|_| SubscriberId::generate()).collect();
        state
            .insert_records(
                subscribers
                    .iter()
                    .map(|s| DeliveryRecord::pending(id, *s, long_ago))
                    .collect(),
                None,
            )
            .unwrap();

        let mut sent = state.record(RecordKey::new(id, subscribers[0])).unwrap();
        sent.mark_sent(long_ago);
        state.update_record(&sent).unwrap();

        let mut failed = state.record(RecordKey::new(id, subscribers[1])).unwrap();
        failed.mark_failed("550", long_ago);
        state.update_record(&failed).unwrap();

        let removed = state.remove_terminal_before(Utc::now() - Duration::days(30));
        assert_eq!(removed, 2);
        assert_eq!(state.record_count(), 1);

        let archived = state.campaign(id).unwrap().archived;
        assert_eq!(archived.sent, 1);
        assert_eq!(archived.failed, 1);
    }

    #[test]
    fn test_refresh_total_sent_counts_live_and_archived() {
        let mut state = StoreState::default();
        let campaign = campaign(CampaignStatus::Sending);
        let id = campaign.id;
        state.insert_campaign(campaign).unwrap();

        let long_ago = Utc::now() - Duration::days(40);
        let mut old = DeliveryRecord::pending(id, SubscriberId::generate(), long_ago);
        old.mark_sent(long_ago);
        let mut fresh = DeliveryRecord::pending(id, SubscriberId::generate(), Utc::now());
        fresh.mark_sent(Utc::now());
        state.insert_records(vec![old, fresh], None).unwrap();

        assert_eq!(state.refresh_total_sent(id).unwrap(), 2);
        state.remove_terminal_before(Utc::now() - Duration::days(30));
        assert_eq!(state.refresh_total_sent(id).unwrap(), 2);
        assert_eq!(state.campaign(id).unwrap().counters.total_sent, 2);

        assert!(matches!(
            state.refresh_total_sent(CampaignId::generate()),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn test_lock_expiry() {
        let mut state = StoreState::default();
        let now = Utc::now();

        assert!(state.try_acquire_lock("dispatch", now, 60));
        assert!(!state.try_acquire_lock("dispatch", now + Duration::seconds(59), 60));
        assert!(state.try_acquire_lock("dispatch", now + Duration::seconds(60), 60));

        state.release_lock("dispatch");
        state.release_lock("dispatch");
        assert!(state.lock("dispatch").is_none());
    }

    #[test]
    fn test_duplicate_email_rejected() {
        let mut state = StoreState::default();
        state
            .upsert_subscriber(Subscriber::new("a@example.com", "A"))
            .unwrap();
        let err = state
            .upsert_subscriber(Subscriber::new("A@Example.com", "Other"))
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }
}
