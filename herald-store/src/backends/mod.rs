//! Store implementations
//!
//! - `memory`: In-memory storage for tests and dry runs
//! - `file`: Single-snapshot file storage for production use
//! - `faulty`: Memory storage with injectable failures, for tests

pub mod faulty;
pub mod file;
pub mod memory;

pub use faulty::FaultyStore;
pub use file::{FileStore, FileStoreBuilder};
pub use memory::MemoryStore;
