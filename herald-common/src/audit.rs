//! Audit logging for delivery lifecycle events
//!
//! Structured events that answer "who was sent what, and what happened".
//!
//! ## Audit Events
//!
//! - `CampaignEnqueued`: Delivery records created for a campaign
//! - `DeliveryAttempt`: A record handed to the transport
//! - `DeliverySuccess`: The transport accepted the message
//! - `DeliveryFailure`: A record failed permanently or a retry was scheduled
//! - `SubscriberBounced`: A permanent failure marked the subscriber bounced
//! - `SubscriberStatusChanged`: An unsubscribe or manual reactivation
//! - `CampaignStatusChanged`: A pause, resume or other operator transition
//!
//! Recipient addresses can be redacted through [`AuditConfig`].

use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};

/// Audit logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Emit audit events at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Replace the local part of recipient addresses with `[REDACTED]`
    #[serde(default)]
    pub redact_recipients: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            redact_recipients: false,
        }
    }
}

const fn default_true() -> bool {
    true
}

static AUDIT_CONFIG: OnceLock<Arc<AuditConfig>> = OnceLock::new();

/// Initialize audit logging. Only the first call has any effect.
pub fn init(config: AuditConfig) {
    AUDIT_CONFIG.get_or_init(|| Arc::new(config));
}

#[must_use]
pub fn config() -> Arc<AuditConfig> {
    AUDIT_CONFIG
        .get()
        .cloned()
        .unwrap_or_else(|| Arc::new(AuditConfig::default()))
}

/// The current configuration, unless auditing is switched off
fn active() -> Option<Arc<AuditConfig>> {
    Some(config()).filter(|config| config.enabled)
}

/// Redact an email address, keeping the domain
#[must_use]
pub fn redact_email(email: &str, redact: bool) -> String {
    if !redact {
        return email.to_string();
    }

    email.split_once('@').map_or_else(
        || "[REDACTED]".to_string(),
        |(_, domain)| format!("[REDACTED]@{domain}"),
    )
}

pub fn log_campaign_enqueued(campaign_id: &str, inserted: usize, eligible: usize) {
    if active().is_none() {
        return;
    }

    tracing::event!(
        tracing::Level::INFO,
        event = "CampaignEnqueued",
        campaign_id = %campaign_id,
        inserted = inserted,
        eligible = eligible,
        "Audit: Campaign enqueued"
    );
}

/// Logged every time a record is handed to the transport.
///
/// `attempt` is 1-based.
pub fn log_delivery_attempt(campaign_id: &str, recipient: &str, attempt: u32) {
    let Some(config) = active() else {
        return;
    };

    let recipient = redact_email(recipient, config.redact_recipients);

    tracing::event!(
        tracing::Level::INFO,
        event = "DeliveryAttempt",
        campaign_id = %campaign_id,
        recipient = %recipient,
        delivery_attempt = attempt,
        "Audit: Delivery attempt"
    );
}

pub fn log_delivery_success(campaign_id: &str, recipient: &str, attempt: u32, duration_ms: u128) {
    let Some(config) = active() else {
        return;
    };

    let recipient = redact_email(recipient, config.redact_recipients);

    tracing::event!(
        tracing::Level::INFO,
        event = "DeliverySuccess",
        campaign_id = %campaign_id,
        recipient = %recipient,
        delivery_attempt = attempt,
        duration_ms = duration_ms,
        "Audit: Delivery successful"
    );
}

/// Logged when an attempt fails.
///
/// `status` is the resulting record status: `failed` when the failure is
/// final, `pending` when a retry was scheduled.
pub fn log_delivery_failure(
    campaign_id: &str,
    recipient: &str,
    error: &str,
    attempt: u32,
    status: &str,
) {
    let Some(config) = active() else {
        return;
    };

    let recipient = redact_email(recipient, config.redact_recipients);

    tracing::event!(
        tracing::Level::WARN,
        event = "DeliveryFailure",
        campaign_id = %campaign_id,
        recipient = %recipient,
        error = %error,
        delivery_attempt = attempt,
        status = %status,
        "Audit: Delivery failed"
    );
}

pub fn log_subscriber_bounced(subscriber_id: &str, email: &str, reason: &str) {
    let Some(config) = active() else {
        return;
    };

    let email = redact_email(email, config.redact_recipients);

    tracing::event!(
        tracing::Level::WARN,
        event = "SubscriberBounced",
        subscriber_id = %subscriber_id,
        email = %email,
        reason = %reason,
        "Audit: Subscriber marked bounced"
    );
}

pub fn log_subscriber_status_changed(
    subscriber_id: &str,
    status: &str,
    campaign_id: Option<&str>,
) {
    if active().is_none() {
        return;
    }

    tracing::event!(
        tracing::Level::INFO,
        event = "SubscriberStatusChanged",
        subscriber_id = %subscriber_id,
        status = %status,
        campaign_id = campaign_id.unwrap_or("-"),
        "Audit: Subscriber status changed"
    );
}

pub fn log_campaign_status_changed(campaign_id: &str, from: &str, to: &str) {
    if active().is_none() {
        return;
    }

    tracing::event!(
        tracing::Level::INFO,
        event = "CampaignStatusChanged",
        campaign_id = %campaign_id,
        from = %from,
        to = %to,
        "Audit: Campaign status changed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_email() {
        assert_eq!(
            redact_email("user@example.com", true),
            "[REDACTED]@example.com"
        );
        assert_eq!(redact_email("user@example.com", false), "user@example.com");
        assert_eq!(redact_email("invalid", true), "[REDACTED]");
        assert_eq!(redact_email("invalid", false), "invalid");
    }

    #[test]
    fn test_default_config() {
        let config = AuditConfig::default();
        assert!(config.enabled);
        assert!(!config.redact_recipients);
    }

    #[test]
    fn test_audit_disabled() {
        init(AuditConfig {
            enabled: false,
            redact_recipients: true,
        });

        log_campaign_enqueued("campaign", 3, 3);
        log_delivery_attempt("campaign", "rcpt@example.com", 1);
        log_delivery_success("campaign", "rcpt@example.com", 1, 12);
        log_delivery_failure("campaign", "rcpt@example.com", "550 no such user", 1, "failed");
        log_subscriber_bounced("subscriber", "rcpt@example.com", "550 no such user");
        log_subscriber_status_changed("subscriber", "unsubscribed", Some("campaign"));
        log_campaign_status_changed("campaign", "sending", "paused");
    }
}
