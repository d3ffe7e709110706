//! Mapping control commands onto the dispatch service

use std::sync::Arc;

use async_trait::async_trait;
use herald_common::{Campaign, CampaignStatus, Clock, Subscriber};
use herald_delivery::DispatchControl;
use tracing::{debug, warn};

use crate::{
    Command, ControlError, PROTOCOL_VERSION, Request, Response, ResponseData, Result, TrackEvent,
};

/// Handler trait for processing control requests
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Handle a request and return a response
    ///
    /// # Errors
    ///
    /// Returns an error if the command cannot be processed
    async fn handle_request(&self, request: Request) -> Result<Response>;

    /// Handle a request, folding any error into an error response
    async fn handle(&self, request: Request) -> Response {
        debug!("Received request: {request:?}");

        match self.handle_request(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Error handling request: {e}");
                Response::error(e.to_string())
            }
        }
    }
}

/// Runs commands against a [`DispatchControl`] implementation
pub struct DispatchHandler {
    service: Arc<dyn DispatchControl>,
    clock: Arc<dyn Clock>,
}

impl DispatchHandler {
    #[must_use]
    pub fn new(service: Arc<dyn DispatchControl>, clock: Arc<dyn Clock>) -> Self {
        Self { service, clock }
    }

    async fn add_campaign(
        &self,
        title: String,
        content: String,
        ready: bool,
        scheduled_at: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<Response> {
        let mut campaign = Campaign::new(title, content, self.clock.now());
        if ready {
            campaign = campaign.with_status(CampaignStatus::Ready);
        }
        if let Some(at) = scheduled_at {
            campaign = campaign.scheduled_for(at);
        }

        let id = campaign.id;
        let status = campaign.status;
        self.service.add_campaign(campaign).await?;

        Ok(Response::data(ResponseData::Message(format!(
            "Added campaign {id} ({status})"
        ))))
    }
}

#[async_trait]
impl CommandHandler for DispatchHandler {
    async fn handle_request(&self, request: Request) -> Result<Response> {
        if !request.is_version_compatible() {
            return Err(ControlError::IncompatibleVersion {
                got: request.version,
                expected: PROTOCOL_VERSION,
            });
        }

        let data = match request.command {
            Command::Tick => ResponseData::Tick(self.service.tick().await),

            Command::ProcessNow { campaign_id } => {
                ResponseData::Report(self.service.process_now(campaign_id).await?)
            }

            Command::Enqueue { campaign_id } => match self.service.enqueue(campaign_id).await {
                Ok(report) => ResponseData::Enqueued(report),
                // The campaign was still finished, so this is informational.
                Err(e) if !e.is_fatal() => ResponseData::Message(e.to_string()),
                Err(e) => return Err(e.into()),
            },

            Command::Status { campaign_id } => {
                ResponseData::QueueStatus(self.service.queue_status(campaign_id).await?)
            }

            Command::ClearQueue => ResponseData::Cleared(self.service.clear_queue().await?),

            Command::Sweep => ResponseData::Swept(self.service.sweep().await?),

            Command::Pause { campaign_id } => {
                self.service.pause(campaign_id).await?;
                return Ok(Response::ok());
            }

            Command::Resume { campaign_id } => {
                self.service.resume(campaign_id).await?;
                return Ok(Response::ok());
            }

            Command::Track { campaign_id, event } => {
                let total = match event {
                    TrackEvent::Open => self.service.track_open(campaign_id).await?,
                    TrackEvent::Click => self.service.track_click(campaign_id).await?,
                };
                ResponseData::Tracked {
                    campaign_id,
                    event,
                    total,
                }
            }

            Command::Unsubscribe {
                subscriber_id,
                campaign_id,
            } => ResponseData::SubscriberChanged {
                subscriber_id,
                changed: self.service.unsubscribe(subscriber_id, campaign_id).await?,
            },

            Command::Reactivate { subscriber_id } => ResponseData::SubscriberChanged {
                subscriber_id,
                changed: self.service.reactivate(subscriber_id).await?,
            },

            Command::AddSubscriber { email, name, tags } => {
                let subscriber = tags
                    .into_iter()
                    .fold(Subscriber::new(email, name), |subscriber, tag| {
                        subscriber.with_tag(tag)
                    });
                let id = subscriber.id;
                self.service.add_subscriber(subscriber).await?;
                ResponseData::Message(format!("Added subscriber {id}"))
            }

            Command::AddCampaign {
                title,
                content,
                ready,
                scheduled_at,
            } => {
                return self
                    .add_campaign(title, content, ready, scheduled_at)
                    .await;
            }

            Command::ShowCampaign { campaign_id } => {
                ResponseData::Campaign(Box::new(self.service.campaign(campaign_id).await?))
            }
        };

        Ok(Response::data(data))
    }
}
