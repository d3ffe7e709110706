//! Bounce classification for SMTP replies
//!
//! Decides whether a rejection is about the address (permanent: fail the
//! record and bounce the subscriber) or about the moment (temporary: retry
//! later). The enhanced status code (RFC 3463) is preferred when present
//! because it is more specific than the basic reply code.

use std::{fmt, str::FromStr};

use crate::error::{DeliveryError, PermanentError, TemporaryError};

/// An RFC 3463 enhanced status code, e.g. `5.1.1`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnhancedStatus {
    pub class: u8,
    pub subject: u16,
    pub detail: u16,
}

impl EnhancedStatus {
    #[must_use]
    pub const fn new(class: u8, subject: u16, detail: u16) -> Self {
        Self {
            class,
            subject,
            detail,
        }
    }

    /// Extract the enhanced status from the start of a reply text.
    #[must_use]
    pub fn from_reply_text(text: &str) -> Option<Self> {
        text.split_whitespace().next()?.parse().ok()
    }
}

impl FromStr for EnhancedStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('.');
        let class = parts.next().ok_or(())?.parse::<u8>().map_err(|_| ())?;
        let subject = parts.next().ok_or(())?.parse::<u16>().map_err(|_| ())?;
        let detail = parts.next().ok_or(())?.parse::<u16>().map_err(|_| ())?;

        if parts.next().is_some() || !matches!(class, 2 | 4 | 5) {
            return Err(());
        }

        Ok(Self::new(class, subject, detail))
    }
}

impl fmt::Display for EnhancedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.class, self.subject, self.detail)
    }
}

/// Classify a non-success SMTP reply.
///
/// `message` is the reply text and is carried into the resulting error.
#[must_use]
pub fn classify_reply(
    code: u16,
    enhanced: Option<EnhancedStatus>,
    message: &str,
) -> DeliveryError {
    let text = format!("{code} {message}");

    if let Some(classified) = enhanced.and_then(|status| classify_enhanced(status, &text)) {
        return classified;
    }

    match code {
        421 | 451 => TemporaryError::ServerBusy(text).into(),
        452 | 552 => TemporaryError::MailboxFull(text).into(),
        400..=499 => TemporaryError::SmtpTemporary(text).into(),
        550 | 551 | 553 => PermanentError::InvalidRecipient(text).into(),
        521 | 556 => PermanentError::DomainNotFound(text).into(),
        554 => PermanentError::MessageRejected(text).into(),
        // 500-504 are syntax and sequencing errors on our side; the address
        // is not at fault.
        _ => TemporaryError::SmtpTemporary(text).into(),
    }
}

fn classify_enhanced(status: EnhancedStatus, text: &str) -> Option<DeliveryError> {
    let text = text.to_string();
    match (status.class, status.subject, status.detail) {
        (4, 2, 2) | (5, 2, 2) => Some(TemporaryError::MailboxFull(text).into()),
        (4, 7, _) => Some(TemporaryError::RateLimited(text).into()),
        (4, _, _) => Some(TemporaryError::SmtpTemporary(text).into()),
        (5, 1, 2 | 10) | (5, 4, 4) => Some(PermanentError::DomainNotFound(text).into()),
        (5, 1, _) => Some(PermanentError::InvalidRecipient(text).into()),
        (5, 2, 1) | (5, 7, _) => Some(PermanentError::Blocked(text).into()),
        // Message-level problems (size, content, media) say nothing about
        // the recipient address.
        (5, 3 | 6, _) => Some(TemporaryError::SmtpTemporary(text).into()),
        _ => None,
    }
}
