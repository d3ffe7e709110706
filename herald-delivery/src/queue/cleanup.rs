//! Retention cleanup of finished delivery records
//!
//! Only terminal records (sent, failed, skipped) are ever removed, and only
//! once they are older than the retention window. Their outcomes are folded
//! into the owning campaign's archived tally by the store, so counters still
//! add up afterwards.

use chrono::{DateTime, TimeDelta, Utc};
use herald_common::tracing;
use herald_store::Store;

use crate::types::ClearReport;

/// Oldest `updated_at` a terminal record may have and still be kept.
#[must_use]
pub fn retention_cutoff(now: DateTime<Utc>, retention_days: u32) -> DateTime<Utc> {
    now.checked_sub_signed(TimeDelta::days(i64::from(retention_days)))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Delete terminal records last updated before the retention window.
///
/// # Errors
/// Returns the store error if the records cannot be removed.
pub async fn clear_queue(
    store: &dyn Store,
    retention_days: u32,
    now: DateTime<Utc>,
) -> herald_store::Result<ClearReport> {
    let cutoff = retention_cutoff(now, retention_days);
    let removed = store.remove_terminal_before(cutoff).await?;

    tracing::info!(removed, %cutoff, "Cleared finished delivery records");

    Ok(ClearReport { removed })
}
