//! The tick loop

use ahash::AHashSet;
use chrono::{DateTime, Utc};
use herald_common::{
    CampaignId, CampaignStatus, DeliveryRecord, dispatch, saturating_add_secs, tracing,
};
use herald_store::StoreError;

use super::Dispatcher;
use crate::{
    rate_limiter::RateLimiter,
    types::{StopReason, TickOutcome, TickReport},
};

impl Dispatcher {
    /// Run one tick over every sending campaign.
    pub async fn tick(&self) -> TickReport {
        self.run(None).await
    }

    /// Run one tick restricted to a single campaign.
    pub async fn tick_campaign(&self, campaign_id: CampaignId) -> TickReport {
        self.run(Some(campaign_id)).await
    }

    async fn run(&self, only: Option<CampaignId>) -> TickReport {
        let started = self.clock.now();

        match self.lock.acquire(started).await {
            Ok(true) => {}
            Ok(false) => {
                dispatch!(level = INFO, "Dispatch already in progress, skipping tick");
                return TickReport::skipped_locked();
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to acquire dispatch lock");
                return TickReport::new(TickOutcome::Failed(e.to_string()));
            }
        }

        let mut report = TickReport::new(TickOutcome::Completed);
        let locked = self.run_locked(only, started, &mut report).await;

        // Always released, whatever happened while it was held.
        if let Err(e) = self.lock.release().await {
            tracing::error!(error = %e, "Failed to release dispatch lock");
            if locked.is_ok() {
                report.outcome = TickOutcome::Failed(e.to_string());
            }
        }

        let campaigns = match locked {
            Ok(campaigns) => campaigns,
            Err(e) => {
                tracing::error!(error = %e, "Tick aborted by store error");
                report.outcome = TickOutcome::Failed(e.to_string());
                return report;
            }
        };

        if let Err(e) = self.finish(&campaigns, only, &mut report).await {
            tracing::error!(error = %e, "Failed to finalize campaigns after tick");
            report.outcome = TickOutcome::Failed(e.to_string());
        }

        dispatch!(
            level = INFO,
            "Tick finished: processed={} delivered={} failed={} retried={} skipped={} remaining={} stop={:?}",
            report.processed,
            report.delivered,
            report.failed,
            report.retried,
            report.skipped,
            report.remaining,
            report.stop_reason
        );

        report
    }

    /// Everything that must happen while holding the lock. Returns the
    /// campaigns this tick looked at.
    async fn run_locked(
        &self,
        only: Option<CampaignId>,
        started: DateTime<Utc>,
        report: &mut TickReport,
    ) -> Result<Vec<CampaignId>, StoreError> {
        report.requeued_stale = self.requeue_stale(started).await? as u64;

        let campaigns: Vec<CampaignId> = self
            .store
            .campaigns()
            .await?
            .into_iter()
            .filter(|campaign| campaign.status == CampaignStatus::Sending)
            .filter(|campaign| only.is_none_or(|id| campaign.id == id))
            .map(|campaign| campaign.id)
            .collect();

        if campaigns.is_empty() {
            report.stop_reason = Some(StopReason::BatchComplete);
            return Ok(campaigns);
        }

        let limiter = RateLimiter::load(self.rate_limit.clone(), &*self.store, started).await?;
        let batch = self
            .store
            .pending_batch(&campaigns, self.config.batch_size, started)
            .await?;

        let stop = self.drain(batch, &campaigns, &limiter, started, report).await;

        // The bucket is written back even when draining hit a store error,
        // so tokens spent on real sends stay spent.
        let persisted = limiter.persist(&*self.store).await;
        report.stop_reason = Some(stop?);
        persisted?;

        Ok(campaigns)
    }

    async fn drain(
        &self,
        batch: Vec<DeliveryRecord>,
        campaigns: &[CampaignId],
        limiter: &RateLimiter,
        started: DateTime<Utc>,
        report: &mut TickReport,
    ) -> Result<StopReason, StoreError> {
        let deadline = saturating_add_secs(started, self.config.time_budget_secs);
        let mut active: AHashSet<CampaignId> = campaigns.iter().copied().collect();

        for record in batch {
            if !active.contains(&record.campaign_id) {
                continue;
            }

            let now = self.clock.now();
            if now >= deadline {
                return Ok(StopReason::TimeBudget);
            }

            // Pause is cooperative: it is noticed between sends.
            let campaign = self.store.campaign(record.campaign_id).await?;
            let Some(campaign) = campaign.filter(|c| c.status == CampaignStatus::Sending) else {
                dispatch!(
                    level = INFO,
                    "Campaign {} is no longer sending, leaving its records pending",
                    record.campaign_id
                );
                active.remove(&record.campaign_id);
                if active.is_empty() {
                    return Ok(StopReason::Paused);
                }
                continue;
            };

            let subscriber = match self.store.subscriber(record.subscriber_id).await? {
                Some(subscriber) if subscriber.status.is_eligible() => subscriber,
                Some(subscriber) => {
                    let reason = format!("subscriber is {}", subscriber.status);
                    self.skip(record, reason, now, report).await?;
                    continue;
                }
                None => {
                    let reason = "subscriber no longer exists".to_string();
                    self.skip(record, reason, now, report).await?;
                    continue;
                }
            };

            if !limiter.try_consume(1, now) {
                return Ok(StopReason::RateLimited);
            }

            self.deliver(record, &campaign, &subscriber, report).await?;
        }

        Ok(StopReason::BatchComplete)
    }
}
