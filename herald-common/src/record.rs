//! Delivery records: one unit of "send this campaign to this subscriber"

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::ModelError,
    ids::{CampaignId, SubscriberId},
};

/// Delivery state of a single record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordStatus {
    /// Waiting for a tick (possibly gated by a retry backoff)
    Pending,
    /// Claimed by the current tick, outcome not yet written
    Sending,
    Sent,
    Failed,
    /// Not sent because the subscriber stopped being eligible
    Skipped,
}

impl RecordStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Sent | Self::Failed | Self::Skipped)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "sending" => Ok(Self::Sending),
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            _ => Err(ModelError::UnknownStatus {
                kind: "delivery record",
                value: s.to_string(),
            }),
        }
    }
}

/// Composite identity of a delivery record; the idempotency key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    pub campaign_id: CampaignId,
    pub subscriber_id: SubscriberId,
}

impl RecordKey {
    #[must_use]
    pub const fn new(campaign_id: CampaignId, subscriber_id: SubscriberId) -> Self {
        Self {
            campaign_id,
            subscriber_id,
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.campaign_id, self.subscriber_id)
    }
}

/// Persisted per-(campaign, subscriber) delivery state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub campaign_id: CampaignId,
    pub subscriber_id: SubscriberId,
    pub status: RecordStatus,
    pub attempt_count: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    /// Earliest time a retry may be attempted
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// Insertion order, assigned by the store
    pub sequence: u64,
}

impl DeliveryRecord {
    /// Create a fresh pending record
    #[must_use]
    pub const fn pending(
        campaign_id: CampaignId,
        subscriber_id: SubscriberId,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            campaign_id,
            subscriber_id,
            status: RecordStatus::Pending,
            attempt_count: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
            sent_at: None,
            next_attempt_at: None,
            sequence: 0,
        }
    }

    #[must_use]
    pub const fn key(&self) -> RecordKey {
        RecordKey::new(self.campaign_id, self.subscriber_id)
    }

    /// Whether this record may be picked up by a tick at `now`.
    #[must_use]
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.status == RecordStatus::Pending && self.next_attempt_at.is_none_or(|at| at <= now)
    }

    pub const fn mark_sending(&mut self, now: DateTime<Utc>) {
        self.status = RecordStatus::Sending;
        self.updated_at = now;
    }

    pub fn mark_sent(&mut self, now: DateTime<Utc>) {
        self.status = RecordStatus::Sent;
        self.sent_at = Some(now);
        self.next_attempt_at = None;
        self.updated_at = now;
    }

    pub fn mark_failed(&mut self, error: impl Into<String>, now: DateTime<Utc>) {
        self.status = RecordStatus::Failed;
        self.last_error = Some(error.into());
        self.next_attempt_at = None;
        self.updated_at = now;
    }

    pub fn mark_skipped(&mut self, reason: impl Into<String>, now: DateTime<Utc>) {
        self.status = RecordStatus::Skipped;
        self.last_error = Some(reason.into());
        self.updated_at = now;
    }

    /// Give up a `sending` claim without an outcome; the record is picked up
    /// again by the next tick.
    pub fn release_claim(&mut self, reason: impl Into<String>, now: DateTime<Utc>) {
        self.status = RecordStatus::Pending;
        self.last_error = Some(reason.into());
        self.updated_at = now;
    }

    /// Return to pending after a transient failure, gated until `retry_at`.
    pub fn schedule_retry(
        &mut self,
        error: impl Into<String>,
        retry_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) {
        self.status = RecordStatus::Pending;
        self.last_error = Some(error.into());
        self.next_attempt_at = Some(retry_at);
        self.updated_at = now;
    }
}

/// Number of delivery records in each status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: u64,
    pub sending: u64,
    pub sent: u64,
    pub failed: u64,
    pub skipped: u64,
}

impl StatusCounts {
    pub const fn record(&mut self, status: RecordStatus) {
        match status {
            RecordStatus::Pending => self.pending += 1,
            RecordStatus::Sending => self.sending += 1,
            RecordStatus::Sent => self.sent += 1,
            RecordStatus::Failed => self.failed += 1,
            RecordStatus::Skipped => self.skipped += 1,
        }
    }

    #[must_use]
    pub const fn total(&self) -> u64 {
        self.pending + self.sending + self.sent + self.failed + self.skipped
    }

    /// Records that still need work
    #[must_use]
    pub const fn remaining(&self) -> u64 {
        self.pending + self.sending
    }

}

impl FromIterator<RecordStatus> for StatusCounts {
    fn from_iter<I: IntoIterator<Item = RecordStatus>>(iter: I) -> Self {
        let mut counts = Self::default();
        for status in iter {
            counts.record(status);
        }
        counts
    }
}
