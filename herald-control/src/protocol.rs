//! Control protocol types

use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use herald_common::{Campaign, CampaignId, SubscriberId};
use herald_delivery::{
    ClearReport, EnqueueReport, QueueStatus, ScheduledTick, SweepReport, TickOutcome, TickReport,
};
use serde::{Deserialize, Serialize};

/// Current protocol version
pub const PROTOCOL_VERSION: u32 = 1;

/// Request sent to a [`CommandHandler`](crate::CommandHandler) (versioned wrapper)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Protocol version
    pub version: u32,
    /// The actual command to execute
    pub command: Command,
}

/// Engagement events reported by tracking links
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackEvent {
    Open,
    Click,
}

impl Display for TrackEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Open => "open",
            Self::Click => "click",
        })
    }
}

/// Operator commands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Promote due scheduled campaigns, then run one dispatch tick
    Tick,
    /// Run a tick immediately, optionally for one campaign
    ProcessNow { campaign_id: Option<CampaignId> },
    /// Create delivery records for a ready campaign
    Enqueue { campaign_id: CampaignId },
    /// Delivery record counts, overall or for one campaign
    Status { campaign_id: Option<CampaignId> },
    /// Remove finished records past the retention window
    ClearQueue,
    /// Requeue records stranded in `sending`
    Sweep,
    Pause { campaign_id: CampaignId },
    Resume { campaign_id: CampaignId },
    Track {
        campaign_id: CampaignId,
        event: TrackEvent,
    },
    Unsubscribe {
        subscriber_id: SubscriberId,
        /// Campaign whose unsubscribe link was used, if any
        campaign_id: Option<CampaignId>,
    },
    /// Manually return a bounced or unsubscribed subscriber to active
    Reactivate { subscriber_id: SubscriberId },
    AddSubscriber {
        email: String,
        name: String,
        tags: Vec<String>,
    },
    AddCampaign {
        title: String,
        content: String,
        /// Create the campaign `ready` instead of `draft`
        ready: bool,
        scheduled_at: Option<DateTime<Utc>>,
    },
    /// Show a campaign and its counters
    ShowCampaign { campaign_id: CampaignId },
}

/// Response from a handler (versioned wrapper)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Protocol version
    pub version: u32,
    /// The actual response payload
    pub payload: ResponsePayload,
}

/// Response payload types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponsePayload {
    /// Command succeeded
    Ok,
    /// Command succeeded with data
    Data(Box<ResponseData>),
    /// Command failed with error message
    Error(String),
}

/// Response data types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseData {
    /// Scheduled tick: promotions plus the tick itself
    Tick(ScheduledTick),
    /// A single dispatch tick
    Report(TickReport),
    Enqueued(EnqueueReport),
    QueueStatus(QueueStatus),
    Cleared(ClearReport),
    /// `None` when a tick held the lock
    Swept(Option<SweepReport>),
    /// Counter value after a tracking event
    Tracked {
        campaign_id: CampaignId,
        event: TrackEvent,
        total: u64,
    },
    /// Whether a subscriber's status actually changed
    SubscriberChanged {
        subscriber_id: SubscriberId,
        changed: bool,
    },
    Campaign(Box<Campaign>),
    /// Simple string message
    Message(String),
}

impl ResponseData {
    /// Whether this data reports an aborted dispatch tick
    #[must_use]
    pub const fn tick_failed(&self) -> bool {
        match self {
            Self::Tick(scheduled) => !scheduled.tick.success(),
            Self::Report(report) => !report.success(),
            _ => false,
        }
    }
}

fn write_tick(f: &mut Formatter<'_>, report: &TickReport) -> std::fmt::Result {
    match &report.outcome {
        TickOutcome::Completed => f.write_str("Tick:      completed\n")?,
        TickOutcome::SkippedLocked => {
            return f.write_str("Tick:      skipped (another tick holds the lock)\n");
        }
        TickOutcome::Failed(error) => f.write_fmt(format_args!("Tick:      failed: {error}\n"))?,
    }

    f.write_fmt(format_args!("Processed: {}\n", report.processed))?;
    f.write_fmt(format_args!("Delivered: {}\n", report.delivered))?;
    f.write_fmt(format_args!("Failed:    {}\n", report.failed))?;
    f.write_fmt(format_args!("Retried:   {}\n", report.retried))?;
    f.write_fmt(format_args!("Skipped:   {}\n", report.skipped))?;
    f.write_fmt(format_args!("Remaining: {}\n", report.remaining))?;
    if report.requeued_stale > 0 {
        f.write_fmt(format_args!("Requeued:  {}\n", report.requeued_stale))?;
    }
    if let Some(reason) = report.stop_reason {
        f.write_fmt(format_args!("Stopped:   {reason:?}\n"))?;
    }
    for (id, status) in &report.finished_campaigns {
        f.write_fmt(format_args!("Finished:  {id} ({status})\n"))?;
    }
    Ok(())
}

fn write_enqueued(f: &mut Formatter<'_>, report: &EnqueueReport) -> std::fmt::Result {
    f.write_fmt(format_args!(
        "Enqueued:  {} ({} of {} eligible, now {})\n",
        report.campaign_id, report.inserted, report.eligible, report.status
    ))
}

impl Display for ResponseData {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tick(scheduled) => {
                for report in &scheduled.enqueued {
                    write_enqueued(f, report)?;
                }
                write_tick(f, &scheduled.tick)
            }
            Self::Report(report) => write_tick(f, report),
            Self::Enqueued(report) => write_enqueued(f, report),
            Self::QueueStatus(status) => {
                f.write_fmt(format_args!("Pending:   {}\n", status.pending))?;
                f.write_fmt(format_args!("Sending:   {}\n", status.sending))?;
                f.write_fmt(format_args!("Sent:      {}\n", status.sent))?;
                f.write_fmt(format_args!("Failed:    {}\n", status.failed))?;
                f.write_fmt(format_args!("Skipped:   {}\n", status.skipped))?;
                f.write_fmt(format_args!("Total:     {}\n", status.total))
            }
            Self::Cleared(report) => {
                f.write_fmt(format_args!("Removed {} finished record(s)\n", report.removed))
            }
            Self::Swept(Some(report)) => f.write_fmt(format_args!(
                "Requeued {} stale record(s)\n",
                report.requeued
            )),
            Self::Swept(None) => f.write_str("Dispatch in progress, sweep skipped\n"),
            Self::Tracked {
                campaign_id,
                event,
                total,
            } => f.write_fmt(format_args!("Campaign {campaign_id}: {total} {event}(s)\n")),
            Self::SubscriberChanged {
                subscriber_id,
                changed,
            } => {
                if *changed {
                    f.write_fmt(format_args!("Subscriber {subscriber_id} updated\n"))
                } else {
                    f.write_fmt(format_args!("Subscriber {subscriber_id} unchanged\n"))
                }
            }
            Self::Campaign(campaign) => {
                f.write_fmt(format_args!("ID:        {}\n", campaign.id))?;
                f.write_fmt(format_args!("Title:     {}\n", campaign.title))?;
                f.write_fmt(format_args!("Status:    {}\n", campaign.status))?;
                if let Some(at) = campaign.scheduled_at {
                    f.write_fmt(format_args!("Scheduled: {}\n", at.to_rfc3339()))?;
                }
                if let Some(at) = campaign.sent_at {
                    f.write_fmt(format_args!("Finished:  {}\n", at.to_rfc3339()))?;
                }
                f.write_fmt(format_args!("Sent:      {}\n", campaign.counters.total_sent))?;
                f.write_fmt(format_args!("Opened:    {}\n", campaign.counters.total_opened))?;
                f.write_fmt(format_args!("Clicked:   {}\n", campaign.counters.total_clicked))?;
                f.write_fmt(format_args!(
                    "Unsubscribed: {}\n",
                    campaign.counters.total_unsubscribed
                ))
            }
            Self::Message(message) => f.write_fmt(format_args!("{message}\n")),
        }
    }
}

impl Request {
    /// Create a new request with the current protocol version
    #[must_use]
    pub const fn new(command: Command) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            command,
        }
    }

    /// Check if the request version is compatible with the current version
    #[must_use]
    pub const fn is_version_compatible(&self) -> bool {
        self.version == PROTOCOL_VERSION
    }
}

impl Response {
    /// Create an error response
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            payload: ResponsePayload::Error(message.into()),
        }
    }

    /// Create a success response with no data
    #[must_use]
    pub const fn ok() -> Self {
        Self {
            version: PROTOCOL_VERSION,
            payload: ResponsePayload::Ok,
        }
    }

    /// Create a response with data
    #[must_use]
    pub fn data(data: ResponseData) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            payload: ResponsePayload::Data(Box::new(data)),
        }
    }

    /// Check if the response indicates success (not an error)
    #[must_use]
    pub const fn is_success(&self) -> bool {
        !matches!(self.payload, ResponsePayload::Error(_))
    }

    /// The response data, or the error it carries.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::ServerError`](crate::ControlError::ServerError)
    /// for an error response.
    pub fn into_data(self) -> crate::Result<Option<ResponseData>> {
        match self.payload {
            ResponsePayload::Ok => Ok(None),
            ResponsePayload::Data(data) => Ok(Some(*data)),
            ResponsePayload::Error(error) => Err(crate::ControlError::ServerError(error)),
        }
    }
}
