use std::{
    io::ErrorKind,
    path::{Component, Path, PathBuf},
    sync::Arc,
    time::Duration as StdDuration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use herald_common::{
    Campaign, CampaignId, CampaignStatus, Counter, DeliveryRecord, RecordKey, StatusCounts,
    Subscriber, SubscriberId, SubscriberStatus, internal,
};
use tokio::fs;

use crate::{
    StoreError,
    error::{SerializationError, ValidationError},
    state::StoreState,
    r#trait::Store,
    types::{BucketState, LockState},
};

const SNAPSHOT_FILE: &str = "herald.bin";
const SNAPSHOT_TMP_FILE: &str = ".tmp_herald.bin";
const LOCK_FILE: &str = "herald.lock";

/// How long to wait for another process to finish with the store
const LOCK_WAIT: StdDuration = StdDuration::from_secs(10);
const LOCK_POLL: StdDuration = StdDuration::from_millis(10);
/// A lock file older than this was left behind by a crashed process
const LOCK_STALE: StdDuration = StdDuration::from_secs(30);

/// File-based store
///
/// The whole state lives in a single bincode snapshot, `herald.bin`, inside
/// the store directory. Every operation is a read-modify-write of that
/// snapshot performed while holding `herald.lock`, which is created with
/// `create_new` semantics and therefore excludes other herald processes as
/// well as other tasks in this one.
///
/// # Atomicity
/// Snapshots are written to `.tmp_herald.bin` and renamed over the previous
/// one, so a crash mid-write leaves the last complete snapshot in place. An
/// operation that returns an error writes nothing.
///
/// # Performance
/// Every call reads (and every mutation rewrites) the entire snapshot. That
/// suits a command invoked once per scheduler tick, not a hot loop.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
    local: Arc<tokio::sync::Mutex<()>>,
}

impl Default for FileStore {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/herald"),
            local: Arc::default(),
        }
    }
}

impl FileStore {
    /// Validate a store path
    ///
    /// # Security Checks
    /// - Rejects paths containing `..`
    /// - Rejects relative paths
    /// - Rejects paths inside system directories
    ///
    /// # Errors
    /// Returns the first check that failed.
    pub fn validate_path(path: &Path) -> Result<(), ValidationError> {
        if path.components().any(|c| c == Component::ParentDir) {
            return Err(ValidationError::ParentDir(path.display().to_string()));
        }

        if !path.is_absolute() {
            return Err(ValidationError::NotAbsolute(path.display().to_string()));
        }

        let sensitive_prefixes = [
            "/etc",
            "/bin",
            "/sbin",
            "/usr/bin",
            "/usr/sbin",
            "/boot",
            "/sys",
            "/proc",
            "/dev",
        ];

        if let Some(prefix) = sensitive_prefixes
            .into_iter()
            .find(|prefix| path.starts_with(prefix))
        {
            return Err(ValidationError::SystemDirectory {
                prefix,
                path: path.display().to_string(),
            });
        }

        Ok(())
    }

    #[must_use]
    pub fn builder() -> FileStoreBuilder {
        FileStoreBuilder::default()
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the store directory if needed and clear leftovers from a crash.
    ///
    /// # Errors
    /// - If the directory cannot be created
    /// - If the path exists but is not a directory
    pub async fn init(&self) -> crate::Result<()> {
        internal!("Initialising store at {}", self.path.display());

        if !fs::try_exists(&self.path).await? {
            internal!("{} does not exist, creating...", self.path.display());
            fs::create_dir_all(&self.path).await?;
        } else if !fs::metadata(&self.path).await?.is_dir() {
            return Err(ValidationError::NotDirectory(self.path.display().to_string()).into());
        }

        match fs::remove_file(self.path.join(SNAPSHOT_TMP_FILE)).await {
            Ok(()) => internal!(
                level = INFO,
                "Removed partial snapshot left by an interrupted write"
            ),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        Ok(())
    }

    async fn acquire(&self) -> crate::Result<LockFile> {
        let lock_path = self.path.join(LOCK_FILE);
        let deadline = tokio::time::Instant::now() + LOCK_WAIT;

        loop {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&lock_path)
                .await
            {
                Ok(_) => return Ok(LockFile { path: lock_path }),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e.into()),
            }

            if Self::is_stale(&lock_path).await && Self::take_if_stale(&lock_path).await {
                continue;
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(StoreError::Unavailable(format!(
                    "timed out waiting for {}",
                    lock_path.display()
                )));
            }

            tokio::time::sleep(LOCK_POLL).await;
        }
    }

    async fn is_stale(lock_path: &Path) -> bool {
        fs::metadata(lock_path)
            .await
            .and_then(|meta| meta.modified())
            .ok()
            .and_then(|modified| modified.elapsed().ok())
            .is_some_and(|age| age > LOCK_STALE)
    }

    /// Move the lock aside under a unique name, so that of several waiters
    /// only one can claim it, and delete it if it is still stale there. A
    /// lock that turns out to be live is put back.
    ///
    /// Returns `true` if creating the lock should be retried straight away.
    async fn take_if_stale(lock_path: &Path) -> bool {
        let claimed = lock_path.with_extension(format!("lock.{}", ulid::Ulid::new()));
        match fs::rename(lock_path, &claimed).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return true,
            Err(e) => {
                internal!(
                    level = ERROR,
                    "Failed to move stale store lock {}: {e}",
                    lock_path.display()
                );
                return false;
            }
        }

        let stale = Self::is_stale(&claimed).await;
        if stale {
            internal!(
                level = WARN,
                "Removing stale store lock {}",
                lock_path.display()
            );
        } else if let Err(e) = fs::hard_link(&claimed, lock_path).await {
            // Someone else holds a fresh lock by now
            internal!(
                level = ERROR,
                "Failed to restore live store lock {}: {e}",
                lock_path.display()
            );
        }

        if let Err(e) = fs::remove_file(&claimed).await {
            internal!(
                level = ERROR,
                "Failed to remove moved store lock {}: {e}",
                claimed.display()
            );
        }
        stale
    }

    async fn load(&self) -> crate::Result<StoreState> {
        match fs::read(self.path.join(SNAPSHOT_FILE)).await {
            Ok(bytes) => {
                let (state, _) = bincode::serde::decode_from_slice::<StoreState, _>(
                    &bytes,
                    bincode::config::standard(),
                )
                .map_err(SerializationError::from)?;
                Ok(state)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(StoreState::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn persist(&self, state: &StoreState) -> crate::Result<()> {
        let bytes = bincode::serde::encode_to_vec(state, bincode::config::standard())
            .map_err(SerializationError::from)?;

        let tmp = self.path.join(SNAPSHOT_TMP_FILE);
        fs::write(&tmp, &bytes).await?;
        fs::rename(&tmp, self.path.join(SNAPSHOT_FILE)).await?;
        Ok(())
    }

    /// Run a read-only operation against the current snapshot.
    async fn view<T, F>(&self, f: F) -> crate::Result<T>
    where
        F: FnOnce(&StoreState) -> T + Send,
        T: Send,
    {
        let _local = self.local.lock().await;
        let _lock = self.acquire().await?;
        let state = self.load().await?;
        Ok(f(&state))
    }

    /// Run a mutation and persist the result if it succeeded.
    async fn update<T, F>(&self, f: F) -> crate::Result<T>
    where
        F: FnOnce(&mut StoreState) -> crate::Result<T> + Send,
        T: Send,
    {
        let _local = self.local.lock().await;
        let _lock = self.acquire().await?;
        let mut state = self.load().await?;
        let value = f(&mut state)?;
        self.persist(&state).await?;
        Ok(value)
    }
}

/// Held store lock; removed on drop
#[derive(Debug)]
struct LockFile {
    path: PathBuf,
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            internal!(
                level = ERROR,
                "Failed to remove store lock {}: {e}",
                self.path.display()
            );
        }
    }
}

#[async_trait]
impl Store for FileStore {
    async fn upsert_subscriber(&self, subscriber: Subscriber) -> crate::Result<()> {
        self.update(|state| state.upsert_subscriber(subscriber))
            .await
    }

    async fn subscriber(&self, id: SubscriberId) -> crate::Result<Option<Subscriber>> {
        self.view(|state| state.subscriber(id)).await
    }

    async fn subscribers(&self) -> crate::Result<Vec<Subscriber>> {
        self.view(StoreState::subscribers).await
    }

    async fn mark_subscriber(
        &self,
        id: SubscriberId,
        status: SubscriberStatus,
    ) -> crate::Result<bool> {
        self.update(|state| state.mark_subscriber(id, status)).await
    }

    async fn reactivate_subscriber(&self, id: SubscriberId) -> crate::Result<bool> {
        self.update(|state| state.reactivate_subscriber(id)).await
    }

    async fn insert_campaign(&self, campaign: Campaign) -> crate::Result<()> {
        self.update(|state| state.insert_campaign(campaign)).await
    }

    async fn campaign(&self, id: CampaignId) -> crate::Result<Option<Campaign>> {
        self.view(|state| state.campaign(id)).await
    }

    async fn campaigns(&self) -> crate::Result<Vec<Campaign>> {
        self.view(StoreState::campaigns).await
    }

    async fn transition_campaign(
        &self,
        id: CampaignId,
        expected: CampaignStatus,
        next: CampaignStatus,
        at: DateTime<Utc>,
    ) -> crate::Result<bool> {
        self.update(|state| state.transition_campaign(id, expected, next, at))
            .await
    }

    async fn increment_counter(
        &self,
        id: CampaignId,
        counter: Counter,
        amount: u64,
    ) -> crate::Result<u64> {
        self.update(|state| state.increment_counter(id, counter, amount))
            .await
    }

    async fn refresh_total_sent(&self, id: CampaignId) -> crate::Result<u64> {
        self.update(|state| state.refresh_total_sent(id)).await
    }

    async fn insert_records(&self, records: Vec<DeliveryRecord>) -> crate::Result<usize> {
        self.update(|state| state.insert_records(records, None))
            .await
    }

    async fn record(&self, key: RecordKey) -> crate::Result<Option<DeliveryRecord>> {
        self.view(|state| state.record(key)).await
    }

    async fn records_for_campaign(&self, id: CampaignId) -> crate::Result<Vec<DeliveryRecord>> {
        self.view(|state| state.records_for_campaign(id)).await
    }

    async fn pending_batch(
        &self,
        campaigns: &[CampaignId],
        limit: usize,
        now: DateTime<Utc>,
    ) -> crate::Result<Vec<DeliveryRecord>> {
        self.view(|state| state.pending_batch(campaigns, limit, now))
            .await
    }

    async fn update_record(&self, record: &DeliveryRecord) -> crate::Result<()> {
        self.update(|state| state.update_record(record)).await
    }

    async fn count_by_status(&self, campaign: Option<CampaignId>) -> crate::Result<StatusCounts> {
        self.view(|state| state.count_by_status(campaign)).await
    }

    async fn remove_terminal_before(&self, cutoff: DateTime<Utc>) -> crate::Result<usize> {
        self.update(|state| Ok(state.remove_terminal_before(cutoff)))
            .await
    }

    async fn requeue_stale_sending(
        &self,
        older_than: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> crate::Result<usize> {
        self.update(|state| Ok(state.requeue_stale_sending(older_than, now)))
            .await
    }

    async fn try_acquire_lock(
        &self,
        key: &str,
        now: DateTime<Utc>,
        ttl_secs: u64,
    ) -> crate::Result<bool> {
        self.update(|state| Ok(state.try_acquire_lock(key, now, ttl_secs)))
            .await
    }

    async fn release_lock(&self, key: &str) -> crate::Result<()> {
        self.update(|state| {
            state.release_lock(key);
            Ok(())
        })
        .await
    }

    async fn lock_state(&self, key: &str) -> crate::Result<Option<LockState>> {
        self.view(|state| state.lock(key)).await
    }

    async fn load_bucket(&self, key: &str) -> crate::Result<Option<BucketState>> {
        self.view(|state| state.bucket(key)).await
    }

    async fn save_bucket(&self, key: &str, bucket: BucketState) -> crate::Result<()> {
        self.update(|state| {
            state.save_bucket(key, bucket);
            Ok(())
        })
        .await
    }
}

/// Builder for [`FileStore`]
#[derive(Debug, Default)]
pub struct FileStoreBuilder {
    path: PathBuf,
}

impl FileStoreBuilder {
    /// Set the store directory
    #[must_use]
    pub fn path(mut self, path: PathBuf) -> Self {
        self.path = path;
        self
    }

    /// Build the store, validating the path
    ///
    /// # Errors
    /// Returns an error if the path fails [`FileStore::validate_path`].
    pub fn build(self) -> crate::Result<FileStore> {
        FileStore::validate_path(&self.path)?;
        Ok(FileStore {
            path: self.path,
            local: Arc::default(),
        })
    }
}
