//! Campaign model and lifecycle

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{error::ModelError, ids::CampaignId};

/// Lifecycle status of a campaign
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CampaignStatus {
    /// Still being edited
    Draft,
    /// Finalized and waiting to be enqueued
    Ready,
    /// Delivery records exist and are being drained
    Sending,
    /// Dispatch suspended by an operator
    Paused,
    /// Every delivery record reached a terminal state
    Sent,
    /// Finished without a single successful delivery
    Failed,
}

impl CampaignStatus {
    /// Whether the state machine allows moving from `self` to `next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Draft, Self::Ready)
                | (Self::Ready, Self::Draft | Self::Sending | Self::Sent)
                | (Self::Sending, Self::Paused | Self::Sent | Self::Failed)
                | (Self::Paused, Self::Sending)
        )
    }

    /// Whether the campaign can no longer change.
    #[must_use]
    pub const fn is_finished(self) -> bool {
        matches!(self, Self::Sent | Self::Failed)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Ready => "ready",
            Self::Sending => "sending",
            Self::Paused => "paused",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CampaignStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "draft" => Ok(Self::Draft),
            "ready" => Ok(Self::Ready),
            "sending" => Ok(Self::Sending),
            "paused" => Ok(Self::Paused),
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            _ => Err(ModelError::UnknownStatus {
                kind: "campaign",
                value: s.to_string(),
            }),
        }
    }
}

/// Campaign-level counter that can be bumped atomically
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Counter {
    Sent,
    Opened,
    Clicked,
    Unsubscribed,
}

/// Derived campaign counters
///
/// `total_sent` is recomputed from delivery records; the others are bumped by
/// atomic increments from the tracking and unsubscribe paths.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignCounters {
    pub total_sent: u64,
    pub total_opened: u64,
    pub total_clicked: u64,
    pub total_unsubscribed: u64,
}

impl CampaignCounters {
    #[must_use]
    pub const fn get(&self, counter: Counter) -> u64 {
        match counter {
            Counter::Sent => self.total_sent,
            Counter::Opened => self.total_opened,
            Counter::Clicked => self.total_clicked,
            Counter::Unsubscribed => self.total_unsubscribed,
        }
    }

    pub fn add(&mut self, counter: Counter, amount: u64) {
        let slot = match counter {
            Counter::Sent => &mut self.total_sent,
            Counter::Opened => &mut self.total_opened,
            Counter::Clicked => &mut self.total_clicked,
            Counter::Unsubscribed => &mut self.total_unsubscribed,
        };
        *slot = slot.saturating_add(amount);
    }
}

/// Terminal delivery records folded away by retention cleanup
///
/// Cleanup deletes old terminal records; their outcomes are kept here so the
/// campaign counters still add up afterwards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivedTally {
    pub sent: u64,
    pub failed: u64,
    pub skipped: u64,
}

impl ArchivedTally {
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.sent + self.failed + self.skipped
    }
}

/// A single newsletter send job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub title: String,
    /// Fully rendered message body, produced outside herald
    pub content: String,
    pub status: CampaignStatus,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub counters: CampaignCounters,
    pub archived: ArchivedTally,
}

impl Campaign {
    /// Create a new draft campaign
    #[must_use]
    pub fn new(title: impl Into<String>, content: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: CampaignId::generate(),
            title: title.into(),
            content: content.into(),
            status: CampaignStatus::Draft,
            scheduled_at: None,
            created_at: now,
            sent_at: None,
            counters: CampaignCounters::default(),
            archived: ArchivedTally::default(),
        }
    }

    /// Builder-style helper to set the status directly (used when importing)
    #[must_use]
    pub const fn with_status(mut self, status: CampaignStatus) -> Self {
        self.status = status;
        self
    }

    /// Builder-style helper to schedule the campaign
    #[must_use]
    pub const fn scheduled_for(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    /// A ready campaign is due once its schedule (if any) has passed.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == CampaignStatus::Ready && self.scheduled_at.is_none_or(|at| at <= now)
    }

    /// Apply a status transition, enforcing the state machine.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidTransition`] if the move is not allowed.
    pub fn transition(&mut self, next: CampaignStatus) -> Result<(), ModelError> {
        if !self.status.can_transition_to(next) {
            return Err(ModelError::InvalidTransition {
                kind: "campaign",
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }
}
