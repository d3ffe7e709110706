//! Typed error handling for delivery operations.
//!
//! Send failures are split the way the dispatcher needs to act on them:
//! - Permanent failures: fail the record and bounce the subscriber
//! - Temporary failures: retry with backoff
//! - System errors: something on our side is broken

use herald_common::{CampaignId, CampaignStatus, ModelError, SubscriberId};
use herald_store::StoreError;
use thiserror::Error;

/// Top-level delivery error type.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Permanent failure: {0}")]
    Permanent(#[from] PermanentError),

    #[error("Temporary failure: {0}")]
    Temporary(#[from] TemporaryError),

    #[error("System error: {0}")]
    System(#[from] SystemError),
}

/// Address-level rejections that will not succeed on retry.
#[derive(Debug, Error)]
pub enum PermanentError {
    /// Mailbox does not exist or the address is malformed.
    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    /// Domain does not exist or does not accept mail.
    #[error("Domain not found: {0}")]
    DomainNotFound(String),

    /// Recipient or policy explicitly blocks us.
    #[error("Blocked: {0}")]
    Blocked(String),

    /// Any other permanent rejection.
    #[error("Message rejected: {0}")]
    MessageRejected(String),
}

/// Conditions expected to clear up on their own.
#[derive(Debug, Error)]
pub enum TemporaryError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Server busy: {0}")]
    ServerBusy(String),

    /// Provider-side rate limiting.
    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Mailbox full: {0}")]
    MailboxFull(String),

    #[error("Temporary SMTP error: {0}")]
    SmtpTemporary(String),
}

/// Internal problems that are not the recipient's fault.
#[derive(Debug, Error)]
pub enum SystemError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DeliveryError {
    /// Returns `true` if this error is temporary and should be retried.
    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        matches!(self, Self::Temporary(_))
    }

    /// Returns `true` if this error is permanent and should not be retried.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }

    /// Returns `true` if this is a system error.
    #[must_use]
    pub const fn is_system(&self) -> bool {
        matches!(self, Self::System(_))
    }
}

/// Errors from populating the delivery queue.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The campaign is not in the `ready` state.
    #[error("Campaign {id} is already enqueued (status {status})")]
    AlreadyEnqueued { id: CampaignId, status: CampaignStatus },

    /// No active subscribers; the campaign was finished with zero sends.
    #[error("Campaign {0} has no eligible subscribers")]
    NoEligibleSubscribers(CampaignId),

    #[error("Campaign not found: {0}")]
    CampaignNotFound(CampaignId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl QueueError {
    /// Whether the caller should treat this as a failure.
    ///
    /// An empty audience still finishes the campaign, so it is reported but
    /// not fatal.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, Self::NoEligibleSubscribers(_))
    }
}

/// Errors from dispatch service operations.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Campaign not found: {0}")]
    CampaignNotFound(CampaignId),

    #[error("Subscriber not found: {0}")]
    SubscriberNotFound(SubscriberId),

    /// The requested status change is not allowed from the current status.
    #[error(transparent)]
    InvalidTransition(#[from] ModelError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_error_categories() {
        let temporary = DeliveryError::from(TemporaryError::Timeout("DATA".to_string()));
        assert!(temporary.is_temporary());
        assert!(!temporary.is_permanent());

        let permanent = DeliveryError::from(PermanentError::InvalidRecipient(
            "nobody@example.com".to_string(),
        ));
        assert!(permanent.is_permanent());
        assert!(!permanent.is_system());

        let system = DeliveryError::from(SystemError::Internal("oops".to_string()));
        assert!(system.is_system());
    }

    #[test]
    fn test_error_display() {
        let error = DeliveryError::from(TemporaryError::MailboxFull(
            "452 4.2.2 mailbox full".to_string(),
        ));
        assert_eq!(
            error.to_string(),
            "Temporary failure: Mailbox full: 452 4.2.2 mailbox full"
        );
    }

    #[test]
    fn test_no_eligible_subscribers_is_not_fatal() {
        let id = CampaignId::generate();
        assert!(!QueueError::NoEligibleSubscribers(id).is_fatal());
        assert!(QueueError::CampaignNotFound(id).is_fatal());
    }
}
