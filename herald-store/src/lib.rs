//! Persistent state for herald
//!
//! The [`Store`] trait is the only way the rest of herald touches persisted
//! state. Each method is a single atomic operation.

pub mod backends;
pub mod config;
pub mod error;
mod state;
pub mod r#trait;
pub mod types;

pub use backends::{FaultyStore, FileStore, FileStoreBuilder, MemoryStore};
pub use config::StoreConfig;
pub use error::{Result, SerializationError, StoreError, ValidationError};
pub use r#trait::Store;
pub use types::{BucketState, LockState};
