//! SMTP relay transport
//!
//! Hands each message to a single configured relay (a local MTA or a
//! provider's submission endpoint) over plain TCP. Every protocol phase has
//! its own timeout, and any non-success reply is run through
//! [`classify_reply`](super::classify::classify_reply).

pub mod client;
pub mod error;
pub mod message;
pub mod reply;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::Utc;
use herald_common::{Clock, SystemClock, tracing};
use serde::{Deserialize, Serialize};

use self::{client::RelaySession, error::RelayError};
use super::{OutboundMessage, SendOutcome, Transport, classify};
use crate::error::{DeliveryError, SystemError, TemporaryError};

/// SMTP operation timeout configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpTimeouts {
    /// Default: 30 seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_secs: u64,

    /// Covers both the greeting and EHLO/HELO. Default: 30 seconds
    #[serde(default = "default_ehlo_timeout")]
    pub ehlo_secs: u64,

    /// Default: 30 seconds
    #[serde(default = "default_mail_from_timeout")]
    pub mail_from_secs: u64,

    /// Default: 30 seconds
    #[serde(default = "default_rcpt_to_timeout")]
    pub rcpt_to_secs: u64,

    /// DATA command and message transmission. Default: 120 seconds
    #[serde(default = "default_data_timeout")]
    pub data_secs: u64,

    /// Default: 10 seconds
    #[serde(default = "default_quit_timeout")]
    pub quit_secs: u64,
}

impl Default for SmtpTimeouts {
    fn default() -> Self {
        Self {
            connect_secs: default_connect_timeout(),
            ehlo_secs: default_ehlo_timeout(),
            mail_from_secs: default_mail_from_timeout(),
            rcpt_to_secs: default_rcpt_to_timeout(),
            data_secs: default_data_timeout(),
            quit_secs: default_quit_timeout(),
        }
    }
}

const fn default_connect_timeout() -> u64 {
    30
}

const fn default_ehlo_timeout() -> u64 {
    30
}

const fn default_mail_from_timeout() -> u64 {
    30
}

const fn default_rcpt_to_timeout() -> u64 {
    30
}

const fn default_data_timeout() -> u64 {
    120
}

const fn default_quit_timeout() -> u64 {
    10
}

/// Relay connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpConfig {
    /// `host:port` of the relay
    pub relay: String,

    /// Name announced in EHLO/HELO and used for Message-IDs
    #[serde(default = "default_helo_name")]
    pub helo_name: String,

    /// Envelope sender and `From:` address
    pub from_address: String,

    #[serde(default)]
    pub from_name: String,

    #[serde(default)]
    pub timeouts: SmtpTimeouts,
}

fn default_helo_name() -> String {
    "localhost".to_string()
}

/// Sends every message through one SMTP relay
#[derive(Debug, Clone)]
pub struct SmtpTransport {
    config: SmtpConfig,
    clock: Arc<dyn Clock>,
}

impl SmtpTransport {
    #[must_use]
    pub fn new(config: SmtpConfig) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
        }
    }

    /// Use `clock` for the `Date:` header
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    async fn phase<T>(
        name: &'static str,
        secs: u64,
        future: impl Future<Output = error::Result<T>>,
    ) -> error::Result<T> {
        tokio::time::timeout(Duration::from_secs(secs), future)
            .await
            .map_err(|_| RelayError::Timeout(name))?
    }

    async fn deliver(&self, outbound: &OutboundMessage) -> error::Result<()> {
        let timeouts = &self.config.timeouts;
        let helo_name = &self.config.helo_name;

        let mut session = Self::phase(
            "connect",
            timeouts.connect_secs,
            RelaySession::connect(&self.config.relay),
        )
        .await?;

        Self::phase("greeting", timeouts.ehlo_secs, session.greeting())
            .await?
            .positive()?;

        let ehlo = Self::phase(
            "EHLO",
            timeouts.ehlo_secs,
            session.command(&format!("EHLO {helo_name}")),
        )
        .await?;
        if !ehlo.is_positive() {
            tracing::debug!(code = ehlo.code, "EHLO rejected, falling back to HELO");
            Self::phase(
                "HELO",
                timeouts.ehlo_secs,
                session.command(&format!("HELO {helo_name}")),
            )
            .await?
            .positive()?;
        }

        Self::phase(
            "MAIL FROM",
            timeouts.mail_from_secs,
            session.command(&format!("MAIL FROM:<{}>", self.config.from_address)),
        )
        .await?
        .positive()?;

        Self::phase(
            "RCPT TO",
            timeouts.rcpt_to_secs,
            session.command(&format!("RCPT TO:<{}>", outbound.to_email)),
        )
        .await?
        .positive()?;

        let data = Self::phase("DATA", timeouts.data_secs, session.command("DATA")).await?;
        if !data.is_intermediate() {
            return Err(data.into_rejection());
        }

        let payload = message::render(
            outbound,
            &message::mailbox(&self.config.from_name, &self.config.from_address),
            helo_name,
            self.clock.now(),
        );
        Self::phase("end of data", timeouts.data_secs, session.message(&payload))
            .await?
            .positive()?;

        // Accepted by now; a failed QUIT changes nothing.
        if let Err(e) = Self::phase("QUIT", timeouts.quit_secs, session.command("QUIT")).await {
            tracing::debug!(error = %e, "QUIT failed after successful delivery");
        }

        Ok(())
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    async fn send(&self, message: &OutboundMessage) -> SendOutcome {
        let started = Utc::now();
        let outcome = match self.deliver(message).await {
            Ok(()) => SendOutcome::Delivered,
            Err(e) => DeliveryError::from(e).into(),
        };

        tracing::debug!(
            relay = %self.config.relay,
            campaign_id = %message.campaign_id,
            subscriber_id = %message.subscriber_id,
            duration_ms = (Utc::now() - started).num_milliseconds(),
            outcome = ?outcome,
            "SMTP relay transaction finished"
        );

        outcome
    }
}

/// Rejections are classified by [`classify::classify_reply`]; anything
/// that goes wrong with the connection itself is temporary.
impl From<RelayError> for DeliveryError {
    fn from(error: RelayError) -> Self {
        match error {
            RelayError::Rejected { code, text } => classify::classify_reply(
                code,
                classify::EnhancedStatus::from_reply_text(&text),
                &text,
            ),
            RelayError::Io(e) => {
                Self::Temporary(TemporaryError::ConnectionFailed(format!("I/O error: {e}")))
            }
            RelayError::Closed => Self::Temporary(TemporaryError::ConnectionFailed(
                "Relay closed the connection".to_string(),
            )),
            RelayError::Timeout(phase) => Self::Temporary(TemporaryError::Timeout(phase.to_string())),
            RelayError::Malformed(msg) => Self::System(SystemError::Internal(format!(
                "Malformed relay reply: {msg}"
            ))),
        }
    }
}
