//! Delivery queue population
//!
//! Turns a ready campaign into one pending [`DeliveryRecord`] per active
//! subscriber. Running it twice never creates a second record for the same
//! (campaign, subscriber) pair.

pub mod cleanup;

use std::sync::Arc;

use ahash::AHashSet;
use chrono::{DateTime, Utc};
use herald_common::{
    CampaignId, CampaignStatus, Clock, DeliveryRecord, SubscriberId, audit, internal, tracing,
};
use herald_store::Store;

use crate::{error::QueueError, types::EnqueueReport};

#[derive(Debug, Clone)]
pub struct QueueManager {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl QueueManager {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Create pending records for a ready campaign and move it to sending.
    ///
    /// # Errors
    ///
    /// - [`QueueError::CampaignNotFound`] if the campaign does not exist
    /// - [`QueueError::AlreadyEnqueued`] if it is not in `ready`
    /// - [`QueueError::NoEligibleSubscribers`] if nobody is active; the
    ///   campaign is moved straight to `sent` with zero counts
    /// - [`QueueError::Store`] if the store fails
    pub async fn enqueue(&self, campaign_id: CampaignId) -> Result<EnqueueReport, QueueError> {
        let campaign = self
            .store
            .campaign(campaign_id)
            .await?
            .ok_or(QueueError::CampaignNotFound(campaign_id))?;

        if campaign.status != CampaignStatus::Ready {
            return Err(QueueError::AlreadyEnqueued {
                id: campaign_id,
                status: campaign.status,
            });
        }

        let now = self.clock.now();
        let eligible: Vec<SubscriberId> = self
            .store
            .subscribers()
            .await?
            .into_iter()
            .filter(|subscriber| subscriber.status.is_eligible())
            .map(|subscriber| subscriber.id)
            .collect();

        if eligible.is_empty() {
            return Err(self.finish_without_audience(campaign_id, now).await?);
        }

        let existing: AHashSet<SubscriberId> = self
            .store
            .records_for_campaign(campaign_id)
            .await?
            .into_iter()
            .map(|record| record.subscriber_id)
            .collect();

        let records: Vec<DeliveryRecord> = eligible
            .iter()
            .filter(|id| !existing.contains(*id))
            .map(|&subscriber_id| DeliveryRecord::pending(campaign_id, subscriber_id, now))
            .collect();

        let inserted = self.store.insert_records(records).await?;

        let moved = self
            .store
            .transition_campaign(
                campaign_id,
                CampaignStatus::Ready,
                CampaignStatus::Sending,
                now,
            )
            .await?;

        if !moved {
            // Lost a race with another enqueue; the records it made are the
            // same ones we would have.
            return Err(self.lost_race(campaign_id).await?);
        }

        tracing::info!(
            campaign_id = %campaign_id,
            eligible = eligible.len(),
            inserted,
            "Campaign enqueued"
        );
        audit::log_campaign_enqueued(&campaign_id.to_string(), inserted, eligible.len());

        Ok(EnqueueReport {
            campaign_id,
            eligible: eligible.len(),
            inserted,
            status: CampaignStatus::Sending,
        })
    }

    /// Mark a ready campaign with nobody to send to as sent. Returns the
    /// error `enqueue` reports in its place.
    async fn finish_without_audience(
        &self,
        campaign_id: CampaignId,
        now: DateTime<Utc>,
    ) -> Result<QueueError, QueueError> {
        let moved = self
            .store
            .transition_campaign(campaign_id, CampaignStatus::Ready, CampaignStatus::Sent, now)
            .await?;
        if !moved {
            internal!(
                level = WARN,
                "Campaign {campaign_id} left ready before it could be marked sent"
            );
            return self.lost_race(campaign_id).await;
        }

        internal!(
            level = INFO,
            "Campaign {campaign_id} has no eligible subscribers, marked sent"
        );
        Ok(QueueError::NoEligibleSubscribers(campaign_id))
    }

    /// The campaign moved out of `ready` under us; report where it went.
    async fn lost_race(&self, campaign_id: CampaignId) -> Result<QueueError, QueueError> {
        let campaign = self
            .store
            .campaign(campaign_id)
            .await?
            .ok_or(QueueError::CampaignNotFound(campaign_id))?;
        Ok(QueueError::AlreadyEnqueued {
            id: campaign_id,
            status: campaign.status,
        })
    }

    /// Enqueue every ready campaign whose schedule has passed.
    ///
    /// Campaigns with no audience are reported as finished rather than
    /// failing the whole call.
    ///
    /// # Errors
    /// Returns the first fatal [`QueueError`].
    pub async fn enqueue_due(&self) -> Result<Vec<EnqueueReport>, QueueError> {
        let now = self.clock.now();
        let due: Vec<CampaignId> = self
            .store
            .campaigns()
            .await?
            .into_iter()
            .filter(|campaign| campaign.is_due(now))
            .map(|campaign| campaign.id)
            .collect();

        let mut reports = Vec::with_capacity(due.len());
        for campaign_id in due {
            match self.enqueue(campaign_id).await {
                Ok(report) => reports.push(report),
                Err(QueueError::NoEligibleSubscribers(id)) => reports.push(EnqueueReport {
                    campaign_id: id,
                    eligible: 0,
                    inserted: 0,
                    status: CampaignStatus::Sent,
                }),
                Err(QueueError::AlreadyEnqueued { id, status }) => {
                    tracing::debug!(campaign_id = %id, %status, "Campaign enqueued concurrently");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(reports)
    }
}
