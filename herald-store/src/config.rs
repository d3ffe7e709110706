use std::{path::PathBuf, sync::Arc};

use serde::Deserialize;

use crate::{
    backends::{FileStore, MemoryStore},
    r#trait::Store,
};

/// Which store backs herald
///
/// File-backed store in RON config:
/// ```ron
/// Herald (
///     store: File(path: "/var/lib/herald"),
/// )
/// ```
///
/// Memory-backed store with a record limit:
/// ```ron
/// Herald (
///     store: Memory(capacity: Some(1000)),
/// )
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub enum StoreConfig {
    /// Snapshot files under `path` (production)
    File { path: PathBuf },
    /// Process-local memory (tests, dry runs)
    Memory {
        #[serde(default)]
        capacity: Option<usize>,
    },
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::File {
            path: PathBuf::from("/var/lib/herald"),
        }
    }
}

impl StoreConfig {
    /// The store directory for file-backed stores
    #[must_use]
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            Self::File { path } => Some(path),
            Self::Memory { .. } => None,
        }
    }

    /// Build and initialise the configured store.
    ///
    /// # Errors
    /// Returns an error if a file store path is invalid or cannot be created.
    pub async fn open(self) -> crate::Result<Arc<dyn Store>> {
        match self {
            Self::File { path } => {
                let store = FileStore::builder().path(path).build()?;
                store.init().await?;
                Ok(Arc::new(store))
            }
            Self::Memory { capacity } => Ok(capacity.map_or_else(
                || Arc::new(MemoryStore::new()) as Arc<dyn Store>,
                |capacity| Arc::new(MemoryStore::with_capacity(capacity)),
            )),
        }
    }
}
