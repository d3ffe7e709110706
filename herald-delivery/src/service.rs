//! Service facade over queueing, dispatch and statistics
//!
//! [`DispatchControl`] is what outer surfaces (the control protocol, the
//! CLI) program against, so they can be tested against a mock instead of a
//! real store and transport.

use std::sync::Arc;

use async_trait::async_trait;
use herald_common::{
    Campaign, CampaignId, CampaignStatus, Clock, ModelError, Subscriber, SubscriberId, audit,
    internal, tracing,
};
use herald_store::Store;
use serde::{Deserialize, Serialize};

use crate::{
    error::{DispatchError, QueueError},
    policy::RetryPolicy,
    processor::{DispatchConfig, Dispatcher},
    queue::{QueueManager, cleanup},
    rate_limiter::RateLimitConfig,
    stats::StatsAggregator,
    transport::Transport,
    types::{
        ClearReport, EnqueueReport, QueueStatus, ScheduledTick, SweepReport, TickOutcome,
        TickReport,
    },
};

/// Dispatch-side configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub dispatch: DispatchConfig,

    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

/// Operations exposed to control surfaces
#[async_trait]
pub trait DispatchControl: Send + Sync {
    /// Promote due campaigns, then run one dispatch tick.
    async fn tick(&self) -> ScheduledTick;

    /// Run one tick now, optionally for a single campaign. A ready campaign
    /// is enqueued first.
    async fn process_now(&self, campaign_id: Option<CampaignId>)
    -> Result<TickReport, DispatchError>;

    async fn enqueue(&self, campaign_id: CampaignId) -> Result<EnqueueReport, QueueError>;

    async fn queue_status(
        &self,
        campaign_id: Option<CampaignId>,
    ) -> Result<QueueStatus, DispatchError>;

    /// Remove finished records older than the retention window.
    async fn clear_queue(&self) -> Result<ClearReport, DispatchError>;

    /// Requeue stranded `sending` records. `None` if a tick holds the lock.
    async fn sweep(&self) -> Result<Option<SweepReport>, DispatchError>;

    async fn pause(&self, campaign_id: CampaignId) -> Result<(), DispatchError>;

    async fn resume(&self, campaign_id: CampaignId) -> Result<(), DispatchError>;

    async fn track_open(&self, campaign_id: CampaignId) -> Result<u64, DispatchError>;

    async fn track_click(&self, campaign_id: CampaignId) -> Result<u64, DispatchError>;

    /// Returns whether the subscriber was newly unsubscribed.
    async fn unsubscribe(
        &self,
        subscriber_id: SubscriberId,
        campaign_id: Option<CampaignId>,
    ) -> Result<bool, DispatchError>;

    /// The only way out of `bounced` or `unsubscribed`.
    async fn reactivate(&self, subscriber_id: SubscriberId) -> Result<bool, DispatchError>;

    async fn add_subscriber(&self, subscriber: Subscriber) -> Result<(), DispatchError>;

    async fn add_campaign(&self, campaign: Campaign) -> Result<(), DispatchError>;

    async fn campaign(&self, campaign_id: CampaignId) -> Result<Campaign, DispatchError>;
}

#[derive(Debug, Clone)]
pub struct DispatchService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    queue: QueueManager,
    dispatcher: Dispatcher,
    stats: StatsAggregator,
    retention_days: u32,
}

impl DispatchService {
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
        config: ServiceConfig,
    ) -> Self {
        internal!("Initialising dispatch service ...");

        let retention_days = config.dispatch.retention_days;
        let dispatcher = Dispatcher::new(store.clone(), transport)
            .with_clock(clock.clone())
            .with_config(config.dispatch)
            .with_retry_policy(config.retry)
            .with_rate_limit(config.rate_limit);

        Self {
            queue: QueueManager::new(store.clone(), clock.clone()),
            stats: StatsAggregator::new(store.clone()),
            dispatcher,
            store,
            clock,
            retention_days,
        }
    }

    #[must_use]
    pub const fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    async fn move_campaign(
        &self,
        campaign_id: CampaignId,
        expected: CampaignStatus,
        next: CampaignStatus,
    ) -> Result<(), DispatchError> {
        self.campaign(campaign_id).await?;
        let moved = self
            .store
            .transition_campaign(campaign_id, expected, next, self.clock.now())
            .await?;
        if moved {
            audit::log_campaign_status_changed(
                &campaign_id.to_string(),
                &expected.to_string(),
                &next.to_string(),
            );
            return Ok(());
        }

        let campaign = self.campaign(campaign_id).await?;
        Err(ModelError::InvalidTransition {
            kind: "campaign",
            from: campaign.status.to_string(),
            to: next.to_string(),
        }
        .into())
    }

    async fn require_subscriber(&self, subscriber_id: SubscriberId) -> Result<(), DispatchError> {
        self.store
            .subscriber(subscriber_id)
            .await?
            .map(|_| ())
            .ok_or(DispatchError::SubscriberNotFound(subscriber_id))
    }
}

#[async_trait]
impl DispatchControl for DispatchService {
    async fn tick(&self) -> ScheduledTick {
        let enqueued = match self.queue.enqueue_due().await {
            Ok(enqueued) => enqueued,
            Err(e) => {
                tracing::error!(error = %e, "Failed to enqueue due campaigns");
                return ScheduledTick {
                    enqueued: Vec::new(),
                    tick: TickReport::new(TickOutcome::Failed(e.to_string())),
                };
            }
        };

        ScheduledTick {
            enqueued,
            tick: self.dispatcher.tick().await,
        }
    }

    async fn process_now(
        &self,
        campaign_id: Option<CampaignId>,
    ) -> Result<TickReport, DispatchError> {
        let Some(campaign_id) = campaign_id else {
            return Ok(self.dispatcher.tick().await);
        };

        let campaign = self.campaign(campaign_id).await?;
        if campaign.status == CampaignStatus::Ready {
            match self.queue.enqueue(campaign_id).await {
                Ok(_) => {}
                Err(e) if !e.is_fatal() => {
                    tracing::info!(%campaign_id, reason = %e, "Nothing to process");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(self.dispatcher.tick_campaign(campaign_id).await)
    }

    async fn enqueue(&self, campaign_id: CampaignId) -> Result<EnqueueReport, QueueError> {
        self.queue.enqueue(campaign_id).await
    }

    async fn queue_status(
        &self,
        campaign_id: Option<CampaignId>,
    ) -> Result<QueueStatus, DispatchError> {
        if let Some(campaign_id) = campaign_id {
            self.campaign(campaign_id).await?;
        }
        Ok(self.stats.queue_status(campaign_id).await?)
    }

    async fn clear_queue(&self) -> Result<ClearReport, DispatchError> {
        Ok(cleanup::clear_queue(&*self.store, self.retention_days, self.clock.now()).await?)
    }

    async fn sweep(&self) -> Result<Option<SweepReport>, DispatchError> {
        Ok(self.dispatcher.sweep().await?)
    }

    async fn pause(&self, campaign_id: CampaignId) -> Result<(), DispatchError> {
        self.move_campaign(campaign_id, CampaignStatus::Sending, CampaignStatus::Paused)
            .await
    }

    async fn resume(&self, campaign_id: CampaignId) -> Result<(), DispatchError> {
        self.move_campaign(campaign_id, CampaignStatus::Paused, CampaignStatus::Sending)
            .await
    }

    async fn track_open(&self, campaign_id: CampaignId) -> Result<u64, DispatchError> {
        self.campaign(campaign_id).await?;
        Ok(self.stats.record_open(campaign_id).await?)
    }

    async fn track_click(&self, campaign_id: CampaignId) -> Result<u64, DispatchError> {
        self.campaign(campaign_id).await?;
        Ok(self.stats.record_click(campaign_id).await?)
    }

    async fn unsubscribe(
        &self,
        subscriber_id: SubscriberId,
        campaign_id: Option<CampaignId>,
    ) -> Result<bool, DispatchError> {
        self.require_subscriber(subscriber_id).await?;
        if let Some(campaign_id) = campaign_id {
            self.campaign(campaign_id).await?;
        }
        let changed = self
            .stats
            .record_unsubscribe(subscriber_id, campaign_id)
            .await?;
        if changed {
            audit::log_subscriber_status_changed(
                &subscriber_id.to_string(),
                "unsubscribed",
                campaign_id.map(|id| id.to_string()).as_deref(),
            );
        }
        Ok(changed)
    }

    async fn reactivate(&self, subscriber_id: SubscriberId) -> Result<bool, DispatchError> {
        self.require_subscriber(subscriber_id).await?;
        let changed = self.store.reactivate_subscriber(subscriber_id).await?;
        if changed {
            audit::log_subscriber_status_changed(&subscriber_id.to_string(), "active", None);
        }
        Ok(changed)
    }

    async fn add_subscriber(&self, subscriber: Subscriber) -> Result<(), DispatchError> {
        Ok(self.store.upsert_subscriber(subscriber).await?)
    }

    async fn add_campaign(&self, campaign: Campaign) -> Result<(), DispatchError> {
        Ok(self.store.insert_campaign(campaign).await?)
    }

    async fn campaign(&self, campaign_id: CampaignId) -> Result<Campaign, DispatchError> {
        self.store
            .campaign(campaign_id)
            .await?
            .ok_or(DispatchError::CampaignNotFound(campaign_id))
    }
}
