//! Campaign statistics
//!
//! `total_sent` is always recomputed from delivery records (live plus
//! archived), never bumped by hand. Opens, clicks and unsubscribes arrive
//! from outside the dispatch path and use atomic store increments.

use std::sync::Arc;

use herald_common::{CampaignId, Counter, SubscriberId, SubscriberStatus, tracing};
use herald_store::Store;

use crate::types::QueueStatus;

#[derive(Debug, Clone)]
pub struct StatsAggregator {
    store: Arc<dyn Store>,
}

impl StatsAggregator {
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Recompute and store `total_sent` for a campaign.
    ///
    /// The count and the write happen inside one store operation, so
    /// concurrent refreshes cannot overwrite each other with stale totals.
    ///
    /// # Errors
    /// Returns the store error, or `NotFound` if the campaign is missing.
    pub async fn refresh(&self, campaign_id: CampaignId) -> herald_store::Result<u64> {
        self.store.refresh_total_sent(campaign_id).await
    }

    /// Live record counts, for one campaign or across all of them.
    ///
    /// # Errors
    /// Returns the store error if the records cannot be counted.
    pub async fn queue_status(
        &self,
        campaign_id: Option<CampaignId>,
    ) -> herald_store::Result<QueueStatus> {
        self.store
            .count_by_status(campaign_id)
            .await
            .map(QueueStatus::from)
    }

    /// # Errors
    /// Returns the store error, or `NotFound` if the campaign is missing.
    pub async fn record_open(&self, campaign_id: CampaignId) -> herald_store::Result<u64> {
        self.store
            .increment_counter(campaign_id, Counter::Opened, 1)
            .await
    }

    /// # Errors
    /// Returns the store error, or `NotFound` if the campaign is missing.
    pub async fn record_click(&self, campaign_id: CampaignId) -> herald_store::Result<u64> {
        self.store
            .increment_counter(campaign_id, Counter::Clicked, 1)
            .await
    }

    /// Unsubscribe a subscriber, crediting `campaign_id` if the status
    /// actually changed.
    ///
    /// Returns whether the subscriber was newly unsubscribed.
    ///
    /// # Errors
    /// Returns the store error, or `NotFound` if either entity is missing.
    pub async fn record_unsubscribe(
        &self,
        subscriber_id: SubscriberId,
        campaign_id: Option<CampaignId>,
    ) -> herald_store::Result<bool> {
        let changed = self
            .store
            .mark_subscriber(subscriber_id, SubscriberStatus::Unsubscribed)
            .await?;

        if changed && let Some(campaign_id) = campaign_id {
            let total = self
                .store
                .increment_counter(campaign_id, Counter::Unsubscribed, 1)
                .await?;
            tracing::debug!(
                %campaign_id,
                %subscriber_id,
                total_unsubscribed = total,
                "Unsubscribe attributed to campaign"
            );
        }

        Ok(changed)
    }
}
