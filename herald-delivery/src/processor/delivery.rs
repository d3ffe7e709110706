//! Sending a single record and recording the outcome

use std::time::Instant;

use chrono::{DateTime, Utc};
use herald_common::{
    Campaign, DeliveryRecord, RecordStatus, Subscriber, SubscriberStatus, audit, dispatch,
    tracing,
};
use herald_store::StoreError;

use super::Dispatcher;
use crate::{
    transport::{OutboundMessage, SendOutcome},
    types::TickReport,
};

impl Dispatcher {
    /// Mark a record skipped without calling the transport.
    pub(super) async fn skip(
        &self,
        mut record: DeliveryRecord,
        reason: String,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) -> Result<(), StoreError> {
        dispatch!(
            level = DEBUG,
            "Skipping {}: {}",
            record.key(),
            reason
        );

        record.mark_skipped(reason, now);
        self.store.update_record(&record).await?;

        report.skipped += 1;
        report.processed += 1;
        Ok(())
    }

    /// Claim the record, hand it to the transport and store the outcome.
    ///
    /// Only store errors are returned; every transport result becomes record
    /// state.
    pub(super) async fn deliver(
        &self,
        mut record: DeliveryRecord,
        campaign: &Campaign,
        subscriber: &Subscriber,
        report: &mut TickReport,
    ) -> Result<(), StoreError> {
        let campaign_id = campaign.id.to_string();

        record.attempt_count = record.attempt_count.saturating_add(1);
        record.mark_sending(self.clock.now());
        self.store.update_record(&record).await?;
        let claimed = record.clone();

        audit::log_delivery_attempt(&campaign_id, &subscriber.email, record.attempt_count);

        let message = OutboundMessage::new(campaign, subscriber);
        let started = Instant::now();
        let outcome = tokio::time::timeout(self.config.send_timeout(), self.transport.send(&message))
            .await
            .unwrap_or_else(|_| {
                SendOutcome::TransientFailure(format!(
                    "Send timed out after {}s",
                    self.config.send_timeout_secs
                ))
            });
        let now = self.clock.now();

        match outcome {
            SendOutcome::Delivered => {
                record.mark_sent(now);
                self.settle(&claimed, &record).await?;
                report.delivered += 1;

                audit::log_delivery_success(
                    &campaign_id,
                    &subscriber.email,
                    record.attempt_count,
                    started.elapsed().as_millis(),
                );
            }
            SendOutcome::TransientFailure(reason) => {
                if self.retry.should_retry(record.attempt_count) {
                    let retry_at = self.retry.next_attempt_at(record.attempt_count, now);
                    tracing::info!(
                        campaign_id = %campaign.id,
                        subscriber_id = %subscriber.id,
                        attempt = record.attempt_count,
                        retry_at = %retry_at,
                        error = %reason,
                        "Transient failure, retry scheduled"
                    );
                    record.schedule_retry(reason.clone(), retry_at, now);
                    report.retried += 1;
                } else {
                    tracing::warn!(
                        campaign_id = %campaign.id,
                        subscriber_id = %subscriber.id,
                        attempt = record.attempt_count,
                        error = %reason,
                        "Retries exhausted, delivery failed"
                    );
                    record.mark_failed(reason.clone(), now);
                    report.failed += 1;
                }
                self.settle(&claimed, &record).await?;

                audit::log_delivery_failure(
                    &campaign_id,
                    &subscriber.email,
                    &reason,
                    record.attempt_count,
                    record.status.as_str(),
                );
            }
            SendOutcome::PermanentFailure(reason) => {
                record.mark_failed(reason.clone(), now);
                self.settle(&claimed, &record).await?;
                report.failed += 1;

                audit::log_delivery_failure(
                    &campaign_id,
                    &subscriber.email,
                    &reason,
                    record.attempt_count,
                    RecordStatus::Failed.as_str(),
                );

                if self
                    .store
                    .mark_subscriber(subscriber.id, SubscriberStatus::Bounced)
                    .await?
                {
                    audit::log_subscriber_bounced(
                        &subscriber.id.to_string(),
                        &subscriber.email,
                        &reason,
                    );
                }
            }
        }

        report.processed += 1;
        Ok(())
    }

    /// Store the outcome of a claimed record.
    ///
    /// If that write fails the claim is handed back, so the record waits
    /// for the next tick instead of sitting in `sending` until the stale
    /// sweep. The original error is still returned.
    async fn settle(
        &self,
        claimed: &DeliveryRecord,
        settled: &DeliveryRecord,
    ) -> Result<(), StoreError> {
        let Err(e) = self.store.update_record(settled).await else {
            return Ok(());
        };

        let mut released = claimed.clone();
        released.release_claim(format!("outcome not stored: {e}"), self.clock.now());
        match self.store.update_record(&released).await {
            Ok(()) => tracing::warn!(
                key = %claimed.key(),
                error = %e,
                "Failed to store delivery outcome, record returned to pending"
            ),
            Err(revert) => tracing::error!(
                key = %claimed.key(),
                error = %e,
                revert_error = %revert,
                "Failed to store delivery outcome or release the claim; left for the stale sweep"
            ),
        }

        Err(e)
    }
}
