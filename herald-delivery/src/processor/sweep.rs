//! Recovery of records stranded in `sending`
//!
//! A record only stays in `sending` if the tick that claimed it died before
//! writing the outcome. Once the record is older than
//! `stale_sending_after_secs` it goes back to pending; the message may
//! therefore be delivered twice.

use chrono::{DateTime, Utc};
use herald_common::{dispatch, saturating_sub_secs};
use herald_store::StoreError;

use super::Dispatcher;
use crate::types::SweepReport;

impl Dispatcher {
    /// Requeue stale records. The caller must hold the dispatch lock.
    pub(super) async fn requeue_stale(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let older_than = saturating_sub_secs(now, self.config.stale_sending_after_secs);

        let requeued = self.store.requeue_stale_sending(older_than, now).await?;
        if requeued > 0 {
            dispatch!(
                level = WARN,
                "Requeued {} records stuck in sending since before {}",
                requeued,
                older_than
            );
        }

        Ok(requeued)
    }

    /// Run only the stale-sending sweep, under the dispatch lock.
    ///
    /// Returns `None` if a tick currently holds the lock.
    ///
    /// # Errors
    /// Returns the store error if the sweep fails. The lock is released
    /// either way.
    pub async fn sweep(&self) -> Result<Option<SweepReport>, StoreError> {
        let now = self.clock.now();
        if !self.lock.acquire(now).await? {
            return Ok(None);
        }

        let requeued = self.requeue_stale(now).await;
        let released = self.lock.release().await;
        let requeued = requeued?;
        released?;

        Ok(Some(SweepReport { requeued }))
    }
}
