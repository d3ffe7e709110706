//! Transport adapter
//!
//! A [`Transport`] hands one rendered message to the outside world and
//! reports an [`SendOutcome`]. It never touches the store; the dispatcher
//! turns the outcome into record and subscriber state.

pub mod classify;
pub mod log;
pub mod smtp;

use std::sync::Arc;

use async_trait::async_trait;
use herald_common::{Campaign, CampaignId, Subscriber, SubscriberId};
use serde::{Deserialize, Serialize};

pub use self::{
    classify::{EnhancedStatus, classify_reply},
    log::LogTransport,
    smtp::{SmtpConfig, SmtpTimeouts, SmtpTransport},
};
use crate::error::DeliveryError;

/// A single message ready to hand to a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub campaign_id: CampaignId,
    pub subscriber_id: SubscriberId,
    pub to_email: String,
    pub to_name: String,
    pub subject: String,
    /// Rendered campaign content
    pub body: String,
}

impl OutboundMessage {
    #[must_use]
    pub fn new(campaign: &Campaign, subscriber: &Subscriber) -> Self {
        Self {
            campaign_id: campaign.id,
            subscriber_id: subscriber.id,
            to_email: subscriber.email.clone(),
            to_name: subscriber.name.clone(),
            subject: campaign.title.clone(),
            body: campaign.content.clone(),
        }
    }
}

/// Result of a single send attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered,
    /// Worth retrying later
    TransientFailure(String),
    /// The address will never accept this message
    PermanentFailure(String),
}

/// System errors are our own fault, so the recipient is not penalised for
/// them: they are retried like any other transient failure.
impl From<DeliveryError> for SendOutcome {
    fn from(error: DeliveryError) -> Self {
        match error {
            DeliveryError::Permanent(_) => Self::PermanentFailure(error.to_string()),
            DeliveryError::Temporary(_) | DeliveryError::System(_) => {
                Self::TransientFailure(error.to_string())
            }
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    async fn send(&self, message: &OutboundMessage) -> SendOutcome;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send(&self, message: &OutboundMessage) -> SendOutcome {
        (**self).send(message).await
    }
}

/// Which transport to build
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportConfig {
    Smtp(SmtpConfig),
    /// Log every message and report it delivered
    #[default]
    Log,
}

impl TransportConfig {
    #[must_use]
    pub fn build(&self) -> Arc<dyn Transport> {
        match self {
            Self::Smtp(config) => Arc::new(SmtpTransport::new(config.clone())),
            Self::Log => Arc::new(LogTransport),
        }
    }
}
