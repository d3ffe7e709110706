//! Subscriber model

use std::{collections::BTreeSet, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{error::ModelError, ids::SubscriberId};

/// Subscription status
///
/// `Unsubscribed` and `Bounced` are sticky: nothing inside herald moves a
/// subscriber out of them except an explicit [`Subscriber::reactivate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubscriberStatus {
    Active,
    Inactive,
    Unsubscribed,
    Bounced,
    Blocked,
}

impl SubscriberStatus {
    /// Only active subscribers receive new delivery records.
    #[must_use]
    pub const fn is_eligible(self) -> bool {
        matches!(self, Self::Active)
    }

    /// Statuses that automatic processing must never leave.
    #[must_use]
    pub const fn is_sticky(self) -> bool {
        matches!(self, Self::Unsubscribed | Self::Bounced)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Unsubscribed => "unsubscribed",
            Self::Bounced => "bounced",
            Self::Blocked => "blocked",
        }
    }
}

impl fmt::Display for SubscriberStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriberStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            "unsubscribed" => Ok(Self::Unsubscribed),
            "bounced" => Ok(Self::Bounced),
            "blocked" => Ok(Self::Blocked),
            _ => Err(ModelError::UnknownStatus {
                kind: "subscriber",
                value: s.to_string(),
            }),
        }
    }
}

/// A newsletter recipient
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscriber {
    pub id: SubscriberId,
    pub email: String,
    pub name: String,
    pub status: SubscriberStatus,
    pub tags: BTreeSet<String>,
}

impl Subscriber {
    /// Create a new active subscriber
    #[must_use]
    pub fn new(email: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: SubscriberId::generate(),
            email: email.into(),
            name: name.into(),
            status: SubscriberStatus::Active,
            tags: BTreeSet::new(),
        }
    }

    #[must_use]
    pub const fn with_status(mut self, status: SubscriberStatus) -> Self {
        self.status = status;
        self
    }

    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Move to `next` as part of automatic processing (bounce, unsubscribe).
    ///
    /// Returns `true` if the status actually changed. A subscriber already in a
    /// sticky status is left untouched.
    pub fn mark(&mut self, next: SubscriberStatus) -> bool {
        if self.status == next || self.status.is_sticky() {
            return false;
        }
        self.status = next;
        true
    }

    /// Manual reactivation, the only way out of a sticky status.
    pub fn reactivate(&mut self) -> bool {
        if self.status == SubscriberStatus::Active {
            return false;
        }
        self.status = SubscriberStatus::Active;
        true
    }
}
