//! Reports returned by queueing and dispatch operations

use herald_common::{CampaignId, CampaignStatus, StatusCounts};
use serde::{Deserialize, Serialize};

/// How a tick ended as a whole
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TickOutcome {
    /// The tick ran (it may have had nothing to do)
    Completed,
    /// Another tick holds the dispatch lock
    SkippedLocked,
    /// The store failed; the tick was aborted and the lock released
    Failed(String),
}

/// Why the send loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// Every record in the batch was handled
    BatchComplete,
    /// Out of rate-limit tokens
    RateLimited,
    /// The tick's time budget ran out
    TimeBudget,
    /// Every campaign in the batch was paused
    Paused,
}

/// Result of one dispatcher tick
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    pub outcome: TickOutcome,
    /// Records handled this tick (delivered + failed + retried + skipped)
    pub processed: u64,
    pub delivered: u64,
    pub failed: u64,
    /// Transient failures sent back to pending
    pub retried: u64,
    /// Records whose subscriber was no longer active
    pub skipped: u64,
    /// Pending and sending records left afterwards
    pub remaining: u64,
    /// Records recovered by the stale-sending sweep
    pub requeued_stale: u64,
    pub stop_reason: Option<StopReason>,
    /// Campaigns that reached `sent` or `failed` during this tick
    pub finished_campaigns: Vec<(CampaignId, CampaignStatus)>,
}

impl TickReport {
    #[must_use]
    pub const fn new(outcome: TickOutcome) -> Self {
        Self {
            outcome,
            processed: 0,
            delivered: 0,
            failed: 0,
            retried: 0,
            skipped: 0,
            remaining: 0,
            requeued_stale: 0,
            stop_reason: None,
            finished_campaigns: Vec::new(),
        }
    }

    #[must_use]
    pub const fn skipped_locked() -> Self {
        Self::new(TickOutcome::SkippedLocked)
    }

    /// Lock contention is not a failure; only an aborted tick is.
    #[must_use]
    pub const fn success(&self) -> bool {
        !matches!(self.outcome, TickOutcome::Failed(_))
    }
}

/// Result of a scheduled tick: campaigns promoted, then one dispatch tick
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledTick {
    pub enqueued: Vec<EnqueueReport>,
    pub tick: TickReport,
}

/// Record counts by status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub pending: u64,
    pub sending: u64,
    pub sent: u64,
    pub failed: u64,
    pub skipped: u64,
    pub total: u64,
}

impl From<StatusCounts> for QueueStatus {
    fn from(counts: StatusCounts) -> Self {
        Self {
            pending: counts.pending,
            sending: counts.sending,
            sent: counts.sent,
            failed: counts.failed,
            skipped: counts.skipped,
            total: counts.total(),
        }
    }
}

/// Result of enqueueing one campaign
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnqueueReport {
    pub campaign_id: CampaignId,
    /// Active subscribers at enqueue time
    pub eligible: usize,
    /// Records actually created
    pub inserted: usize,
    /// Campaign status afterwards
    pub status: CampaignStatus,
}

/// Result of retention cleanup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearReport {
    pub removed: usize,
}

/// Result of the stale-sending sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub requeued: usize,
}
