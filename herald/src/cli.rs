//! Command-line surface
//!
//! Each subcommand maps onto one control [`Command`]. `herald tick` is the
//! one meant to run from cron or a systemd timer.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use herald_common::{CampaignId, SubscriberId};
use herald_control::{Command, TrackEvent};

/// Tick-driven newsletter campaign dispatcher
#[derive(Parser, Debug)]
#[command(name = "herald")]
#[command(about = "Dispatch newsletter campaigns", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Configuration file (overrides `HERALD_CONFIG` and the default locations)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Enqueue due scheduled campaigns, then run one dispatch tick
    Tick,
    /// Run a dispatch tick immediately
    ProcessNow {
        /// Only process this campaign (a ready campaign is enqueued first)
        #[arg(long)]
        campaign: Option<CampaignId>,
    },
    /// Create delivery records for a ready campaign
    Enqueue { campaign: CampaignId },
    /// Show delivery record counts
    Status {
        #[arg(long)]
        campaign: Option<CampaignId>,
    },
    /// Remove finished delivery records older than the retention window
    ClearQueue,
    /// Requeue records stuck in `sending`
    Sweep,
    /// Stop sending a campaign after the current message
    Pause { campaign: CampaignId },
    /// Continue sending a paused campaign
    Resume { campaign: CampaignId },
    /// Record an open or click
    Track {
        campaign: CampaignId,
        #[arg(value_enum)]
        event: TrackKind,
    },
    /// Unsubscribe a subscriber
    Unsubscribe {
        subscriber: SubscriberId,
        /// Campaign whose link was used
        #[arg(long)]
        campaign: Option<CampaignId>,
    },
    /// Return a bounced or unsubscribed subscriber to active
    Reactivate { subscriber: SubscriberId },
    /// Add an active subscriber
    AddSubscriber {
        email: String,
        #[arg(long, default_value = "")]
        name: String,
        /// May be given more than once
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// Add a campaign from a rendered content file
    AddCampaign {
        title: String,
        /// File holding the fully rendered message body
        #[arg(long)]
        content: PathBuf,
        /// Mark the campaign ready for sending
        #[arg(long)]
        ready: bool,
        /// RFC 3339 time before which the campaign is not enqueued
        #[arg(long)]
        scheduled_at: Option<DateTime<Utc>>,
    },
    /// Show a campaign and its counters
    Show { campaign: CampaignId },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum TrackKind {
    Open,
    Click,
}

impl From<TrackKind> for TrackEvent {
    fn from(kind: TrackKind) -> Self {
        match kind {
            TrackKind::Open => Self::Open,
            TrackKind::Click => Self::Click,
        }
    }
}

impl Commands {
    /// Build the control command, reading any referenced files.
    ///
    /// # Errors
    /// Returns an error if a content file cannot be read.
    pub fn into_command(self) -> anyhow::Result<Command> {
        Ok(match self {
            Self::Tick => Command::Tick,
            Self::ProcessNow { campaign } => Command::ProcessNow {
                campaign_id: campaign,
            },
            Self::Enqueue { campaign } => Command::Enqueue {
                campaign_id: campaign,
            },
            Self::Status { campaign } => Command::Status {
                campaign_id: campaign,
            },
            Self::ClearQueue => Command::ClearQueue,
            Self::Sweep => Command::Sweep,
            Self::Pause { campaign } => Command::Pause {
                campaign_id: campaign,
            },
            Self::Resume { campaign } => Command::Resume {
                campaign_id: campaign,
            },
            Self::Track { campaign, event } => Command::Track {
                campaign_id: campaign,
                event: event.into(),
            },
            Self::Unsubscribe {
                subscriber,
                campaign,
            } => Command::Unsubscribe {
                subscriber_id: subscriber,
                campaign_id: campaign,
            },
            Self::Reactivate { subscriber } => Command::Reactivate {
                subscriber_id: subscriber,
            },
            Self::AddSubscriber { email, name, tags } => {
                Command::AddSubscriber { email, name, tags }
            }
            Self::AddCampaign {
                title,
                content,
                ready,
                scheduled_at,
            } => {
                let body = std::fs::read_to_string(&content).map_err(|e| {
                    anyhow::anyhow!("Failed to read content from {}: {e}", content.display())
                })?;
                Command::AddCampaign {
                    title,
                    content: body,
                    ready,
                    scheduled_at,
                }
            }
            Self::Show { campaign } => Command::ShowCampaign {
                campaign_id: campaign,
            },
        })
    }
}
