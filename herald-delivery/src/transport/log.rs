//! Dry-run transport

use async_trait::async_trait;
use herald_common::{audit, tracing};

use super::{OutboundMessage, SendOutcome, Transport};

/// Logs each message instead of sending it and always reports success.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTransport;

#[async_trait]
impl Transport for LogTransport {
    async fn send(&self, message: &OutboundMessage) -> SendOutcome {
        let recipient =
            audit::redact_email(&message.to_email, audit::config().redact_recipients);

        tracing::info!(
            campaign_id = %message.campaign_id,
            subscriber_id = %message.subscriber_id,
            recipient = %recipient,
            subject = %message.subject,
            bytes = message.body.len(),
            "Dry run: message not sent"
        );

        SendOutcome::Delivered
    }
}
