//! Shared types for the herald campaign dispatcher
//!
//! Everything that more than one herald crate needs to agree on lives here:
//! - Identifiers for campaigns and subscribers
//! - The campaign, subscriber and delivery record models and their status machines
//! - The [`Clock`] seam used to make time injectable
//! - Logging initialisation and audit events

pub mod audit;
pub mod campaign;
pub mod clock;
pub mod error;
pub mod ids;
pub mod logging;
pub mod record;
pub mod subscriber;

pub use campaign::{ArchivedTally, Campaign, CampaignCounters, CampaignStatus, Counter};
pub use clock::{Clock, ManualClock, SystemClock, saturating_add_secs, saturating_sub_secs};
pub use error::ModelError;
pub use ids::{CampaignId, SubscriberId};
pub use record::{DeliveryRecord, RecordKey, RecordStatus, StatusCounts};
pub use subscriber::{Subscriber, SubscriberStatus};
pub use tracing;
