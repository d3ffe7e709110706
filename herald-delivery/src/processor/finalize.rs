//! Post-tick accounting
//!
//! Runs after the lock is released. Every step is an atomic store operation
//! (the status change is a compare-and-set from `sending`), so it is safe
//! even if another tick has started in the meantime.

use herald_common::{CampaignId, CampaignStatus, dispatch, tracing};
use herald_store::StoreError;

use super::Dispatcher;
use crate::types::TickReport;

impl Dispatcher {
    pub(super) async fn finish(
        &self,
        campaigns: &[CampaignId],
        only: Option<CampaignId>,
        report: &mut TickReport,
    ) -> Result<(), StoreError> {
        for &campaign_id in campaigns {
            let total_sent = self.stats.refresh(campaign_id).await?;
            let counts = self.store.count_by_status(Some(campaign_id)).await?;
            if counts.remaining() > 0 {
                continue;
            }

            let Some(campaign) = self.store.campaign(campaign_id).await? else {
                continue;
            };

            let failed = counts.failed + campaign.archived.failed;
            let next = if total_sent == 0 && failed > 0 {
                CampaignStatus::Failed
            } else {
                CampaignStatus::Sent
            };

            let now = self.clock.now();
            if self
                .store
                .transition_campaign(campaign_id, CampaignStatus::Sending, next, now)
                .await?
            {
                dispatch!(
                    level = INFO,
                    "Campaign {} finished as {} ({} sent, {} failed)",
                    campaign_id,
                    next,
                    total_sent,
                    failed
                );
                report.finished_campaigns.push((campaign_id, next));
            } else {
                tracing::debug!(%campaign_id, "Campaign left sending before it could be finalized");
            }
        }

        report.remaining = self.store.count_by_status(only).await?.remaining();
        Ok(())
    }
}
